// src/io/serial/reader.rs
//
// Per-session reader loop. Runs on its own thread for as long as the session
// is open and streams RX bytes to the bound WebSocket connection as DATA
// frames.
//
// Cancellation is cooperative: the flag is checked once per iteration and the
// bounded wait caps how long it takes to notice.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use super::session::SessionLink;
use crate::bridge::BridgeEvent;
use crate::gateway::codec::{self, Opcode};
use crate::io::{IoError, RxWaiter, WaitOutcome};

/// Largest payload carried by one DATA frame
pub const READ_CHUNK: usize = 4096;

/// Why the reader loop stopped
#[derive(Debug)]
pub(crate) enum ReaderExit {
    /// Session close raised the cancel flag
    Cancelled,
    /// No connection is bound any more (or it went away)
    Unbound,
    /// Waiting or reading failed
    Fault(IoError),
}

/// Blocking reader loop. Returns once the session is cancelled, the bound
/// connection disappears, or the device faults.
pub(crate) fn run_reader(
    link: Arc<SessionLink>,
    mut waiter: Box<dyn RxWaiter>,
    poll: Duration,
    events: mpsc::Sender<BridgeEvent>,
) -> ReaderExit {
    let port_name = link.port_name().to_string();
    tlog!("[Serial:{}] Reader running", port_name);

    let mut buf = vec![0u8; READ_CHUNK];
    let exit = loop {
        if link.is_cancelled() {
            break ReaderExit::Cancelled;
        }

        match waiter.wait_read(&mut buf, poll) {
            Ok(WaitOutcome::TimedOut) => continue,
            // Spurious wake
            Ok(WaitOutcome::Data(0)) => continue,
            Ok(WaitOutcome::Data(n)) => {
                let Some(conn) = link.connection() else {
                    break ReaderExit::Unbound;
                };
                // Waits for the client to drain its queue, so a stalled
                // client throttles the reader
                if !conn.send_paced(codec::data(&buf[..n]), || !link.is_cancelled()) {
                    if link.is_cancelled() {
                        break ReaderExit::Cancelled;
                    }
                    break ReaderExit::Unbound;
                }
            }
            Err(e) => break ReaderExit::Fault(e),
        }
    };

    match exit {
        ReaderExit::Cancelled => {}
        ReaderExit::Unbound => {
            link.mark_inactive();
            let _ = events.send(BridgeEvent::ReaderExited {
                port_name: port_name.clone(),
            });
        }
        ReaderExit::Fault(ref e) => {
            tlog!("[Serial:{}] Reader fault: {}", port_name, e);
            if let Some(conn) = link.connection() {
                conn.send(codec::status_with_message(Opcode::ErrReader, e.detail()));
            }
            // Closed from here on, even before the foreground reaps the session
            link.mark_inactive();
            let _ = events.send(BridgeEvent::ReaderExited {
                port_name: port_name.clone(),
            });
        }
    }

    tlog!("[Serial:{}] Reader finished ({:?})", port_name, exit);
    exit
}

// src/gateway/mod.rs
//
// WebSocket Gateway: maps one inbound binary frame from one connection to a
// session action and produces the response frame.
//
// Runs on the foreground only; it is handed the directory by the bridge for
// each frame and never keeps references into it.

use std::sync::mpsc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self as tokio_mpsc, Receiver};

pub mod codec;
pub mod server;

use crate::bridge::BridgeEvent;
use crate::control::Notifier;
use crate::directory::{Directory, PortEntry};
use crate::io::serial::{utils, SerialSession};
use crate::io::{IoError, PortOpener, SerialDevice};
use codec::{LineConfig, Opcode, Request};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws#{}", self.0)
    }
}

/// Frames a connection may have queued but not yet written to its socket
pub const OUTBOUND_QUEUE_LEN: usize = 64;

/// Queue slots reader DATA frames leave free for request responses
pub const RESPONSE_RESERVE: usize = 8;

/// Back-off while a reader waits for the client to drain its queue
const QUEUE_RETRY: Duration = Duration::from_millis(2);

/// Handle to a WebSocket connection's outbound queue.
///
/// The socket itself is owned by its server task; holding a `Connection` does
/// not keep the socket open.
#[derive(Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: tokio_mpsc::Sender<Vec<u8>>,
}

impl Connection {
    /// New connection handle and the receiving end its socket task drains
    pub fn channel(id: ConnectionId) -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = tokio_mpsc::channel(OUTBOUND_QUEUE_LEN);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a response frame without blocking. Returns false once the socket
    /// task has gone or the client has stopped draining even the reserved slots.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tlog!("[ws] {} outbound queue full, frame dropped", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a DATA frame from a reader thread, waiting while the queue is down
    /// to its reserved slots. Gives up when the socket task has gone or
    /// `keep_waiting` returns false.
    pub fn send_paced(&self, mut frame: Vec<u8>, keep_waiting: impl Fn() -> bool) -> bool {
        loop {
            if self.tx.is_closed() {
                return false;
            }
            if self.tx.capacity() > RESPONSE_RESERVE {
                match self.tx.try_send(frame) {
                    Ok(()) => return true,
                    Err(TrySendError::Full(f)) => frame = f,
                    Err(TrySendError::Closed(_)) => return false,
                }
            }
            if !keep_waiting() {
                return false;
            }
            std::thread::sleep(QUEUE_RETRY);
        }
    }
}

pub struct Gateway {
    opener: Box<dyn PortOpener>,
    reader_poll: Duration,
    events: mpsc::Sender<BridgeEvent>,
    notifier: Notifier,
}

impl Gateway {
    pub fn new(
        opener: Box<dyn PortOpener>,
        reader_poll: Duration,
        events: mpsc::Sender<BridgeEvent>,
        notifier: Notifier,
    ) -> Self {
        Self {
            opener,
            reader_poll,
            events,
            notifier,
        }
    }

    /// Handle one inbound frame. Empty frames get no response.
    pub fn handle_frame(
        &self,
        directory: &mut Directory,
        conn: &Connection,
        frame: &[u8],
    ) -> Option<Vec<u8>> {
        let &opcode = frame.first()?;
        if opcode == Opcode::Open as u8 {
            return Some(self.open(directory, conn, frame));
        }

        let is_close = opcode == Opcode::Close as u8;
        let Some(entry) = directory.lookup_by_connection_mut(conn.id()) else {
            // Closing an already-closed port is not an error
            return Some(if is_close {
                codec::ok()
            } else {
                codec::status(Opcode::ErrNotOpen)
            });
        };

        if !entry.is_open() {
            if is_close {
                entry.reap();
                return Some(codec::ok());
            }
            return Some(codec::status(Opcode::ErrNotOpen));
        }

        let request = match Request::decode(frame) {
            Ok(r) => r,
            Err(e) => return Some(codec::status_with_message(Opcode::Error, e.detail())),
        };
        Some(self.dispatch_open(entry, request))
    }

    /// Tear down whatever session `conn` was bound to, discarding the result.
    pub fn handle_disconnect(&self, directory: &mut Directory, conn: ConnectionId) {
        if let Some(entry) = directory.lookup_by_connection_mut(conn) {
            let port_name = entry.port_name().to_string();
            if let Err(e) = entry.close_session() {
                tlog!("[gateway] {} close on disconnect failed: {}", port_name, e);
            }
            tlog!("[gateway] {} released after {} disconnected", port_name, conn);
            self.notifier.notice(&format!("Port {} closed", port_name));
        }
    }

    fn open(&self, directory: &mut Directory, conn: &Connection, frame: &[u8]) -> Vec<u8> {
        let token = match Request::decode(frame) {
            Ok(Request::Open { token }) => token,
            _ => return codec::status(Opcode::ErrAuth),
        };

        let port_name = match directory.lookup_by_token(token) {
            Some(entry) if entry.is_open() => return codec::status(Opcode::ErrIsOpen),
            Some(entry) => entry.port_name().to_string(),
            None => return codec::status(Opcode::ErrAuth),
        };

        // One connection drives at most one port
        if let Some(bound) = directory.lookup_by_connection_mut(conn.id()) {
            if bound.is_open() {
                return codec::status(Opcode::ErrIsOpen);
            }
            bound.reap();
        }

        let Some(entry) = directory.entry_mut(&port_name) else {
            return codec::status(Opcode::ErrAuth);
        };
        // A reader that faulted earlier may still own resources
        entry.reap();

        match SerialSession::open(
            &port_name,
            conn.clone(),
            self.opener.as_ref(),
            self.reader_poll,
            self.events.clone(),
        ) {
            Ok(session) => {
                entry.attach(session);
                tlog!("[gateway] {} opened by {}", port_name, conn.id());
                self.notifier.notice(&format!("Port {} opened", port_name));
                codec::ok()
            }
            Err(e) => {
                tlog!("[gateway] {} open failed: {}", port_name, e);
                codec::status_with_message(Opcode::Error, e.detail())
            }
        }
    }

    fn dispatch_open(&self, entry: &mut PortEntry, request: Request<'_>) -> Vec<u8> {
        if let Request::Close = request {
            let port_name = entry.port_name().to_string();
            return match entry.close_session() {
                Ok(()) => {
                    self.notifier.notice(&format!("Port {} closed", port_name));
                    codec::ok()
                }
                Err(e) => codec::status_with_message(Opcode::Error, e.detail()),
            };
        }

        let Some(session) = entry.session_mut() else {
            return codec::status(Opcode::ErrNotOpen);
        };
        let device = session.device_mut();

        let result = match request {
            Request::SetConfig(config) => apply_line_config(device, &config),
            Request::SetSignals { dtr, rts } => device
                .write_dtr(dtr)
                .and_then(|_| device.write_rts(rts)),
            Request::GetSignals => {
                return match device.read_signals() {
                    Ok(signals) => codec::ok_with_signals(signals.bits()),
                    Err(e) => codec::status_with_message(Opcode::Error, e.detail()),
                };
            }
            Request::StartBreak => device.set_break(),
            Request::EndBreak => device.clear_break(),
            Request::Data { drain, payload } => device.write_all(payload).and_then(|_| {
                if drain {
                    device.drain()
                } else {
                    Ok(())
                }
            }),
            Request::Drain => device.drain(),
            Request::Open { .. } | Request::Close | Request::Unknown(_) => {
                return codec::status(Opcode::ErrOpcode);
            }
        };

        match result {
            Ok(()) => codec::ok(),
            Err(e) => {
                tlog!("[gateway] {}", e);
                codec::status_with_message(Opcode::Error, e.detail())
            }
        }
    }
}

/// Apply SET_CONFIG fields in order, stopping at the first failure.
/// Fields applied before the failure stay applied.
fn apply_line_config(device: &mut dyn SerialDevice, config: &LineConfig) -> Result<(), IoError> {
    device.set_baud_rate(config.baud_rate)?;
    device.set_data_bits(config.data_bits)?;
    device.set_parity(config.parity)?;
    device.set_stop_bits(config.stop_bits)?;
    tlog!(
        "[Serial:{}] Configured {}",
        device.port_name(),
        utils::line_summary(config.baud_rate, config.data_bits, config.parity, config.stop_bits)
    );
    Ok(())
}

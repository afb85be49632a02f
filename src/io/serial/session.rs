// src/io/serial/session.rs
//
// A Serial Session: the open device handle, its reader thread and the bound
// WebSocket connection for one port.
//
// The foreground owns the session. The only state the reader thread sees is
// the `SessionLink`; it never reaches back into the directory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::reader;
use crate::bridge::BridgeEvent;
use crate::gateway::{Connection, ConnectionId};
use crate::io::{IoError, PortOpener, SerialDevice};

/// State shared between a session and its reader thread
pub struct SessionLink {
    port_name: String,
    cancel: AtomicBool,
    active: AtomicBool,
    connection: Mutex<Option<Connection>>,
}

impl SessionLink {
    pub fn new(port_name: &str, connection: Connection) -> Self {
        Self {
            port_name: port_name.to_string(),
            cancel: AtomicBool::new(false),
            active: AtomicBool::new(true),
            connection: Mutex::new(Some(connection)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// False once the reader has stopped on its own
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn mark_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Clone of the bound connection, if any
    pub fn connection(&self) -> Option<Connection> {
        match self.connection.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tlog!("[Serial:{}] Connection slot poisoned: {}", self.port_name, e);
                None
            }
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection().map(|c| c.id())
    }

    pub fn clear_connection(&self) {
        match self.connection.lock() {
            Ok(mut guard) => *guard = None,
            Err(e) => {
                *e.into_inner() = None;
            }
        }
    }
}

pub struct SerialSession {
    device: Box<dyn SerialDevice>,
    link: Arc<SessionLink>,
    reader: Option<JoinHandle<()>>,
}

impl SerialSession {
    /// Open the device, acquire its RX waiter, bind `connection` and start the reader.
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn open(
        port_name: &str,
        connection: Connection,
        opener: &dyn PortOpener,
        poll: Duration,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<Self, IoError> {
        let device = opener.open(port_name)?;

        let waiter = match device.rx_waiter() {
            Ok(w) => w,
            Err(e) => {
                if let Err(close_err) = device.close() {
                    tlog!("[Serial:{}] Close after failed open: {}", port_name, close_err);
                }
                return Err(e);
            }
        };

        let link = Arc::new(SessionLink::new(port_name, connection));
        let reader_link = link.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("reader {}", port_name))
            .spawn(move || {
                reader::run_reader(reader_link, waiter, poll, events);
            });

        match spawned {
            Ok(handle) => Ok(Self {
                device,
                link,
                reader: Some(handle),
            }),
            Err(e) => {
                // The waiter went down with the unspawned closure
                if let Err(close_err) = device.close() {
                    tlog!("[Serial:{}] Close after failed open: {}", port_name, close_err);
                }
                link.clear_connection();
                Err(IoError::connection(
                    port_name,
                    format!("Failed to start reader: {}", e),
                ))
            }
        }
    }

    pub fn port_name(&self) -> &str {
        self.link.port_name()
    }

    pub fn is_active(&self) -> bool {
        self.link.is_active()
    }

    pub fn is_bound_to(&self, id: ConnectionId) -> bool {
        self.link.connection_id() == Some(id)
    }

    pub fn device_mut(&mut self) -> &mut dyn SerialDevice {
        self.device.as_mut()
    }

    /// Tear down in order: stop reader, release waiter, close device, unbind connection.
    pub fn close(self) -> Result<(), IoError> {
        let SerialSession {
            device,
            link,
            reader,
        } = self;

        link.cancel();
        if let Some(handle) = reader {
            // The waiter is owned by the reader thread and dropped when it returns
            if handle.join().is_err() {
                tlog!("[Serial:{}] Reader thread panicked", link.port_name());
            }
        }

        let result = device.close();
        link.mark_inactive();
        link.clear_connection();
        result
    }
}

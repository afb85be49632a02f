// src/bridge.rs
//
// Foreground event loop. Everything that changes the port directory happens
// here, one event at a time: control requests from the parent, frames and
// connection changes from the WebSocket server, and reader exits.

use std::collections::HashMap;
use std::sync::mpsc;

use crate::control::{ControlHandler, ControlWriter, Notifier};
use crate::directory::Directory;
use crate::exit_status;
use crate::gateway::{Connection, ConnectionId, Gateway};
use crate::io::{PortEnumerator, PortOpener};
use crate::settings::BridgeSettings;

/// Input to the foreground, produced by the stdin reader, the WebSocket
/// server and session reader threads.
#[derive(Debug)]
pub enum BridgeEvent {
    /// One control request body
    Control(Vec<u8>),
    /// Zero-length frame or EOF on stdin
    ControlShutdown,
    /// Fatal control framing error
    ControlFault(String),
    Connected(Connection),
    Frame(ConnectionId, Vec<u8>),
    Disconnected(ConnectionId),
    /// A reader stopped on its own (fault or lost connection)
    ReaderExited { port_name: String },
}

pub struct Bridge {
    directory: Directory,
    control: ControlHandler,
    gateway: Gateway,
    writer: ControlWriter,
    notifier: Notifier,
    connections: HashMap<ConnectionId, Connection>,
}

impl Bridge {
    pub fn new(
        settings: &BridgeSettings,
        opener: Box<dyn PortOpener>,
        enumerator: Box<dyn PortEnumerator>,
        writer: ControlWriter,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Self {
        let notifier = Notifier::new(writer.clone(), settings.control_notices);
        Self {
            directory: Directory::new(),
            control: ControlHandler::new(enumerator, settings.ws_port),
            gateway: Gateway::new(opener, settings.reader_poll(), events, notifier.clone()),
            writer,
            notifier,
            connections: HashMap::new(),
        }
    }

    /// Process events until the control channel ends, then close every
    /// session. Returns the process exit status.
    pub fn run(mut self, events: mpsc::Receiver<BridgeEvent>) -> i32 {
        tlog!("[bridge] Running");
        let status = loop {
            match events.recv() {
                Ok(event) => {
                    if let Some(status) = self.handle_event(event) {
                        break status;
                    }
                }
                Err(_) => break exit_status::ORDERLY,
            }
        };
        self.shutdown();
        tlog!("[bridge] Stopped with status {}", status);
        status
    }

    /// Handle one event. Returns an exit status once the bridge should stop.
    pub fn handle_event(&mut self, event: BridgeEvent) -> Option<i32> {
        match event {
            BridgeEvent::Control(body) => {
                let response = self.control.handle(&mut self.directory, &body);
                if let Err(e) = self.writer.send(&response) {
                    tlog!("[control] {}", e);
                }
            }
            BridgeEvent::ControlShutdown => {
                tlog!("[control] Shutdown requested");
                return Some(exit_status::ORDERLY);
            }
            BridgeEvent::ControlFault(e) => {
                tlog!("[control] Protocol error: {}", e);
                return Some(exit_status::CONTROL_FAULT);
            }
            BridgeEvent::Connected(conn) => {
                tlog!("[ws] {} connected", conn.id());
                self.connections.insert(conn.id(), conn);
            }
            BridgeEvent::Frame(id, frame) => {
                let Some(conn) = self.connections.get(&id) else {
                    tlog!("[ws] Frame from unknown connection {}", id);
                    return None;
                };
                if let Some(response) = self.gateway.handle_frame(&mut self.directory, conn, &frame) {
                    conn.send(response);
                }
            }
            BridgeEvent::Disconnected(id) => {
                tlog!("[ws] {} disconnected", id);
                self.connections.remove(&id);
                self.gateway.handle_disconnect(&mut self.directory, id);
            }
            BridgeEvent::ReaderExited { port_name } => {
                if let Some(entry) = self.directory.entry_mut(&port_name) {
                    if entry.session().is_some_and(|s| !s.is_active()) {
                        entry.reap();
                        self.notifier
                            .notice(&format!("Port {} reader stopped", port_name));
                    }
                }
            }
        }
        None
    }

    fn shutdown(&mut self) {
        self.directory.close_all();
        self.connections.clear();
    }
}

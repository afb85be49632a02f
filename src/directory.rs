// src/directory.rs
//
// Port Directory: one entry per OS port name the parent has ever authorised,
// holding the current auth token (if any) and the open session (if any).
//
// The bridge's foreground thread is the only owner, so every mutation goes
// through `&mut Directory` and no locking is needed. Entries are never
// removed; revoking a token only clears it.

use uuid::Uuid;

use crate::gateway::ConnectionId;
use crate::io::serial::SerialSession;
use crate::io::IoError;

pub struct PortEntry {
    port_name: String,
    auth_token: Option<String>,
    session: Option<SerialSession>,
}

impl PortEntry {
    fn new(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            auth_token: None,
            session: None,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn session(&self) -> Option<&SerialSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut SerialSession> {
        self.session.as_mut()
    }

    /// A session is present and its reader has not stopped on its own
    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_active())
    }

    /// The session (live or faulted) is bound to `id`
    pub fn is_bound_to(&self, id: ConnectionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_bound_to(id))
    }

    pub(crate) fn attach(&mut self, session: SerialSession) {
        self.session = Some(session);
    }

    /// Release a session whose reader already stopped. Live sessions are left alone.
    pub fn reap(&mut self) {
        if self.session.as_ref().is_some_and(|s| !s.is_active()) {
            if let Err(e) = self.close_session() {
                tlog!("[directory] {} release after reader exit failed: {}", self.port_name, e);
            }
        }
    }

    /// Close and drop the session, if any. The entry is closed afterwards
    /// even when releasing the device fails.
    pub fn close_session(&mut self) -> Result<(), IoError> {
        match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct Directory {
    entries: Vec<PortEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the port's token, minting a fresh one if it has none.
    pub fn grant_token(&mut self, port_name: &str) -> &str {
        let index = match self.entries.iter().position(|e| e.port_name == port_name) {
            Some(i) => i,
            None => {
                self.entries.push(PortEntry::new(port_name));
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index];
        if entry.auth_token.is_none() {
            entry.auth_token = Some(Uuid::new_v4().to_string());
            tlog!("[directory] Granted access to {}", port_name);
        }
        entry.auth_token.as_deref().unwrap_or_default()
    }

    /// Clear the port's token. Open sessions are not touched.
    pub fn revoke_token(&mut self, port_name: &str) {
        if let Some(entry) = self.entry_mut(port_name) {
            if entry.auth_token.take().is_some() {
                tlog!("[directory] Revoked access to {}", port_name);
            }
        }
    }

    pub fn lookup_by_token(&self, token: &str) -> Option<&PortEntry> {
        self.entries
            .iter()
            .find(|e| e.auth_token.as_deref() == Some(token))
    }

    pub fn lookup_by_connection(&self, id: ConnectionId) -> Option<&PortEntry> {
        self.entries.iter().find(|e| e.is_bound_to(id))
    }

    pub fn lookup_by_connection_mut(&mut self, id: ConnectionId) -> Option<&mut PortEntry> {
        self.entries.iter_mut().find(|e| e.is_bound_to(id))
    }

    pub fn entry(&self, port_name: &str) -> Option<&PortEntry> {
        self.entries.iter().find(|e| e.port_name == port_name)
    }

    pub fn entry_mut(&mut self, port_name: &str) -> Option<&mut PortEntry> {
        self.entries.iter_mut().find(|e| e.port_name == port_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close every session; used on shutdown.
    pub fn close_all(&mut self) {
        for entry in &mut self.entries {
            if entry.session.is_some() {
                if let Err(e) = entry.close_session() {
                    tlog!("[directory] {} close on shutdown failed: {}", entry.port_name, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Connection;
    use crate::io::mock::MockOpener;
    use std::sync::mpsc;
    use std::time::Duration;

    fn open_session(opener: &MockOpener, port: &str, id: u64) -> SerialSession {
        let (conn, _rx) = Connection::channel(ConnectionId(id));
        let (events_tx, _events_rx) = mpsc::channel();
        SerialSession::open(
            port,
            conn,
            opener,
            Duration::from_millis(5),
            events_tx,
        )
        .unwrap()
    }

    #[test]
    fn test_grant_is_idempotent() {
        let mut dir = Directory::new();
        let first = dir.grant_token("COM3").to_string();
        let second = dir.grant_token("COM3").to_string();
        assert_eq!(first, second);
        assert_eq!(dir.len(), 1);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_tokens_are_distinct_per_port() {
        let mut dir = Directory::new();
        let a = dir.grant_token("COM3").to_string();
        let b = dir.grant_token("COM4").to_string();
        assert_ne!(a, b);
        assert_eq!(dir.lookup_by_token(&a).unwrap().port_name(), "COM3");
        assert_eq!(dir.lookup_by_token(&b).unwrap().port_name(), "COM4");
        assert!(dir.lookup_by_token("").is_none());
    }

    #[test]
    fn test_revoke_then_regrant_mints_new_token() {
        let mut dir = Directory::new();
        let old = dir.grant_token("COM3").to_string();
        dir.revoke_token("COM3");
        assert!(dir.lookup_by_token(&old).is_none());
        assert!(dir.entry("COM3").unwrap().auth_token().is_none());
        // Entry survives revocation
        assert_eq!(dir.len(), 1);

        let new = dir.grant_token("COM3").to_string();
        assert_ne!(old, new);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_revoke_unknown_port_is_noop() {
        let mut dir = Directory::new();
        dir.revoke_token("COM9");
        assert!(dir.is_empty());
    }

    #[test]
    fn test_lookup_by_connection_and_close_all() {
        let opener = MockOpener::new();
        let mut dir = Directory::new();
        dir.grant_token("COM3");
        dir.grant_token("COM4");

        dir.entry_mut("COM3")
            .unwrap()
            .attach(open_session(&opener, "COM3", 1));
        assert!(dir.entry("COM3").unwrap().is_open());
        assert!(!dir.entry("COM4").unwrap().is_open());
        assert_eq!(
            dir.lookup_by_connection(ConnectionId(1)).unwrap().port_name(),
            "COM3"
        );
        assert!(dir.lookup_by_connection(ConnectionId(2)).is_none());

        // Revocation leaves the open session alone
        dir.revoke_token("COM3");
        assert!(dir.entry("COM3").unwrap().is_open());

        dir.close_all();
        assert!(!dir.entry("COM3").unwrap().is_open());
        assert!(dir.lookup_by_connection(ConnectionId(1)).is_none());
        assert!(opener.state("COM3").lock().unwrap().closed);
    }

    #[test]
    fn test_reap_leaves_live_session() {
        let opener = MockOpener::new();
        let mut dir = Directory::new();
        dir.grant_token("COM3");
        let entry = dir.entry_mut("COM3").unwrap();
        entry.attach(open_session(&opener, "COM3", 1));

        entry.reap();
        assert!(entry.is_open());
        entry.close_session().unwrap();
        assert!(entry.session().is_none());
    }
}

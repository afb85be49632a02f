// src/control.rs
//
// Control Channel: length-prefixed JSON exchanged with the parent process over
// stdin/stdout.
//
// Frame format:
//   [Length-4bytes-native-endian][UTF-8 JSON...]
//
// A zero length is an orderly shutdown request. Anything over MAX_FRAME_LEN is
// a protocol violation and ends the process.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::bridge::BridgeEvent;
use crate::directory::Directory;
use crate::io::PortEnumerator;

/// Largest accepted request body
pub const MAX_FRAME_LEN: usize = 4096;

/// Reported by `ping`
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Framing
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum ControlFrame {
    Message(Vec<u8>),
    Shutdown,
}

/// Read one frame. EOF before the first length byte counts as shutdown since
/// the parent has gone away; EOF inside the length prefix is a framing error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<ControlFrame, String> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(ControlFrame::Shutdown),
            Ok(0) => {
                return Err(format!(
                    "Truncated frame length: {} of {} bytes",
                    filled,
                    len_buf.len()
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(format!("Failed to read frame length: {}", e)),
        }
    }

    let len = u32::from_ne_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(ControlFrame::Shutdown);
    }
    if len > MAX_FRAME_LEN {
        return Err(format!(
            "Frame length {} exceeds limit of {} bytes",
            len, MAX_FRAME_LEN
        ));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| format!("Short frame body ({} bytes expected): {}", len, e))?;
    Ok(ControlFrame::Message(body))
}

/// Forward frames from `reader` to the bridge until shutdown or a fault.
pub fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    events: mpsc::Sender<BridgeEvent>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("control reader".to_string())
        .spawn(move || loop {
            let event = match read_frame(&mut reader) {
                Ok(ControlFrame::Message(body)) => BridgeEvent::Control(body),
                Ok(ControlFrame::Shutdown) => BridgeEvent::ControlShutdown,
                Err(e) => BridgeEvent::ControlFault(e),
            };
            let last = !matches!(event, BridgeEvent::Control(_));
            if events.send(event).is_err() || last {
                break;
            }
        })
}

pub fn spawn_stdin_reader(events: mpsc::Sender<BridgeEvent>) -> io::Result<JoinHandle<()>> {
    spawn_reader(io::stdin(), events)
}

/// Serialised access to the control output stream.
///
/// Every frame is written under one lock so responses and notices from
/// different callers never interleave.
#[derive(Clone)]
pub struct ControlWriter {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ControlWriter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn send(&self, message: &Value) -> Result<(), String> {
        let body = serde_json::to_vec(message)
            .map_err(|e| format!("Failed to serialise control frame: {}", e))?;
        let len = u32::try_from(body.len())
            .map_err(|_| format!("Control frame too large: {} bytes", body.len()))?;

        let mut out = self
            .out
            .lock()
            .map_err(|e| format!("Control writer poisoned: {}", e))?;
        out.write_all(&len.to_ne_bytes())
            .and_then(|_| out.write_all(&body))
            .and_then(|_| out.flush())
            .map_err(|e| format!("Failed to write control frame: {}", e))
    }
}

/// Sends unsolicited `{data: "..."}` notices. The parent ignores frames
/// without an `id`, so these are informational only.
#[derive(Clone)]
pub struct Notifier(Option<ControlWriter>);

impl Notifier {
    pub fn new(writer: ControlWriter, enabled: bool) -> Self {
        Self(enabled.then_some(writer))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn notice(&self, text: &str) {
        if let Some(writer) = &self.0 {
            if let Err(e) = writer.send(&json!({ "data": text })) {
                tlog!("[control] Notice dropped: {}", e);
            }
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Failures reported to the parent as `{id?, error: code}`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlError {
    /// Not JSON, or `action`/`id` missing or of the wrong type
    Parse,
    UnknownAction,
    Enumeration,
    GrantMissingPort,
    ResponseBuild,
    RevokeMissingPort,
    PingBuild,
}

impl ControlError {
    pub fn code(self) -> u32 {
        match self {
            ControlError::Parse => 50,
            ControlError::UnknownAction => 51,
            ControlError::Enumeration => 60,
            ControlError::GrantMissingPort => 61,
            ControlError::ResponseBuild => 62,
            ControlError::RevokeMissingPort => 63,
            ControlError::PingBuild => 70,
        }
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            ControlError::Parse => "malformed request",
            ControlError::UnknownAction => "unknown action",
            ControlError::Enumeration => "port enumeration failed",
            ControlError::GrantMissingPort => "authGrant without port",
            ControlError::ResponseBuild => "failed to build response",
            ControlError::RevokeMissingPort => "authRevoke without port",
            ControlError::PingBuild => "failed to build ping response",
        };
        write!(f, "{} (code {})", what, self.code())
    }
}

impl std::error::Error for ControlError {}

struct ControlRequest {
    id: Value,
    action: String,
    fields: Map<String, Value>,
}

impl ControlRequest {
    fn parse(body: &[u8]) -> Result<Self, ControlError> {
        let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(body) else {
            return Err(ControlError::Parse);
        };
        let action = match fields.remove("action") {
            Some(Value::String(action)) => action,
            _ => return Err(ControlError::Parse),
        };
        let id = match fields.remove("id") {
            Some(id @ (Value::String(_) | Value::Number(_))) => id,
            _ => return Err(ControlError::Parse),
        };
        Ok(Self { id, action, fields })
    }

    fn port(&self) -> Option<&str> {
        self.fields.get("port").and_then(Value::as_str)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PingInfo<'a> {
    version: &'a str,
    protocol: u32,
    ws_port: u16,
}

/// Answers control requests against the directory
pub struct ControlHandler {
    enumerator: Box<dyn PortEnumerator>,
    ws_port: u16,
}

impl ControlHandler {
    pub fn new(enumerator: Box<dyn PortEnumerator>, ws_port: u16) -> Self {
        Self {
            enumerator,
            ws_port,
        }
    }

    /// Handle one request body and build the response object.
    pub fn handle(&self, directory: &mut Directory, body: &[u8]) -> Value {
        let request = match ControlRequest::parse(body) {
            Ok(r) => r,
            Err(e) => {
                tlog!("[control] {}", e);
                return json!({ "error": e.code() });
            }
        };

        match self.dispatch(directory, &request) {
            Ok(data) => json!({ "id": request.id, "data": data }),
            Err(e) => {
                tlog!("[control] {} failed: {}", request.action, e);
                json!({ "id": request.id, "error": e.code() })
            }
        }
    }

    fn dispatch(
        &self,
        directory: &mut Directory,
        request: &ControlRequest,
    ) -> Result<Value, ControlError> {
        match request.action.as_str() {
            "ping" => serde_json::to_value(PingInfo {
                version: env!("CARGO_PKG_VERSION"),
                protocol: PROTOCOL_VERSION,
                ws_port: self.ws_port,
            })
            .map_err(|_| ControlError::PingBuild),
            "listPorts" => {
                let ports = self.enumerator.list_ports().map_err(|e| {
                    tlog!("[control] {}", e);
                    ControlError::Enumeration
                })?;
                serde_json::to_value(ports).map_err(|_| ControlError::ResponseBuild)
            }
            "authGrant" => {
                let port = request.port().ok_or(ControlError::GrantMissingPort)?;
                Ok(Value::String(directory.grant_token(port).to_string()))
            }
            "authRevoke" => {
                let port = request.port().ok_or(ControlError::RevokeMissingPort)?;
                directory.revoke_token(port);
                Ok(Value::Null)
            }
            _ => Err(ControlError::UnknownAction),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::mock::MockEnumerator;
    use crate::io::PortDescriptor;
    use std::io::Cursor;

    /// In-memory sink standing in for stdout
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        /// Decode every frame written so far
        pub(crate) fn frames(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            let mut cursor = Cursor::new(bytes);
            let mut out = Vec::new();
            while let Ok(ControlFrame::Message(body)) = read_frame(&mut cursor) {
                out.push(serde_json::from_slice(&body).unwrap());
            }
            out
        }
    }

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut bytes = (body.len() as u32).to_ne_bytes().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    fn handler() -> (ControlHandler, MockEnumerator) {
        let enumerator = MockEnumerator::default();
        (
            ControlHandler::new(Box::new(enumerator.clone()), 23290),
            enumerator,
        )
    }

    #[test]
    fn test_read_frame_message_then_eof() {
        let mut input = framed(br#"{"action":"ping","id":"1"}"#);
        input.extend(framed(b"{}"));
        let mut cursor = Cursor::new(input);

        assert_eq!(
            read_frame(&mut cursor).unwrap(),
            ControlFrame::Message(br#"{"action":"ping","id":"1"}"#.to_vec())
        );
        assert_eq!(
            read_frame(&mut cursor).unwrap(),
            ControlFrame::Message(b"{}".to_vec())
        );
        assert_eq!(read_frame(&mut cursor).unwrap(), ControlFrame::Shutdown);
    }

    #[test]
    fn test_read_frame_zero_length_is_shutdown() {
        let mut cursor = Cursor::new(0u32.to_ne_bytes().to_vec());
        assert_eq!(read_frame(&mut cursor).unwrap(), ControlFrame::Shutdown);
    }

    #[test]
    fn test_read_frame_truncated_length_is_error() {
        let err = read_frame(&mut Cursor::new(vec![0x10, 0x00])).unwrap_err();
        assert!(err.contains("2 of 4"), "{}", err);

        let mut input = framed(b"{}");
        input.push(0x01);
        let mut cursor = Cursor::new(input);
        assert!(matches!(read_frame(&mut cursor), Ok(ControlFrame::Message(_))));
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_spawn_reader_faults_on_truncated_length() {
        let (tx, rx) = mpsc::channel();
        spawn_reader(Cursor::new(vec![0x10, 0x00, 0x00]), tx)
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(rx.recv().unwrap(), BridgeEvent::ControlFault(_)));
    }

    #[test]
    fn test_read_frame_limits() {
        let at_limit = framed(&vec![b' '; MAX_FRAME_LEN]);
        assert!(matches!(
            read_frame(&mut Cursor::new(at_limit)),
            Ok(ControlFrame::Message(_))
        ));

        let over = ((MAX_FRAME_LEN + 1) as u32).to_ne_bytes().to_vec();
        assert!(read_frame(&mut Cursor::new(over)).is_err());

        let mut short = 10u32.to_ne_bytes().to_vec();
        short.extend_from_slice(b"abc");
        assert!(read_frame(&mut Cursor::new(short)).is_err());
    }

    #[test]
    fn test_spawn_reader_stops_after_fault() {
        let mut input = framed(b"{}");
        input.extend_from_slice(&5000u32.to_ne_bytes());
        input.extend(framed(b"never read"));
        let (tx, rx) = mpsc::channel();

        spawn_reader(Cursor::new(input), tx).unwrap().join().unwrap();

        assert!(matches!(rx.recv().unwrap(), BridgeEvent::Control(_)));
        assert!(matches!(rx.recv().unwrap(), BridgeEvent::ControlFault(_)));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_writer_frames_native_endian() {
        let buf = SharedBuf::default();
        let writer = ControlWriter::new(Box::new(buf.clone()));
        writer.send(&json!({ "id": "1", "data": null })).unwrap();

        let bytes = buf.0.lock().unwrap().clone();
        let body = br#"{"data":null,"id":"1"}"#;
        assert_eq!(&bytes[..4], &(body.len() as u32).to_ne_bytes());
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes[4..]).unwrap(),
            json!({ "id": "1", "data": null })
        );
    }

    #[test]
    fn test_notifier() {
        let buf = SharedBuf::default();
        let writer = ControlWriter::new(Box::new(buf.clone()));
        Notifier::new(writer.clone(), true).notice("Port COM3 opened");
        Notifier::new(writer, false).notice("hidden");
        Notifier::disabled().notice("hidden");

        assert_eq!(buf.frames(), vec![json!({ "data": "Port COM3 opened" })]);
    }

    #[test]
    fn test_ping() {
        let (handler, _) = handler();
        let mut dir = Directory::new();
        let response = handler.handle(&mut dir, br#"{"action":"ping","id":"p"}"#);
        assert_eq!(
            response,
            json!({
                "id": "p",
                "data": {
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol": 1,
                    "wsPort": 23290,
                }
            })
        );
    }

    #[test]
    fn test_auth_grant_is_stable_until_revoked() {
        let (handler, _) = handler();
        let mut dir = Directory::new();
        let grant = br#"{"action":"authGrant","id":"1","port":"COM3"}"#;

        let first = handler.handle(&mut dir, grant);
        let token = first["data"].as_str().unwrap().to_string();
        assert_eq!(first["id"], "1");
        assert_eq!(handler.handle(&mut dir, grant)["data"], token.as_str());

        let revoke = handler.handle(&mut dir, br#"{"action":"authRevoke","id":"2","port":"COM3"}"#);
        assert_eq!(revoke, json!({ "id": "2", "data": null }));
        assert!(dir.lookup_by_token(&token).is_none());

        let regrant = handler.handle(&mut dir, grant);
        assert_ne!(regrant["data"], token.as_str());
    }

    #[test]
    fn test_auth_revoke_unknown_port_succeeds() {
        let (handler, _) = handler();
        let mut dir = Directory::new();
        let response = handler.handle(&mut dir, br#"{"action":"authRevoke","id":3,"port":"COM9"}"#);
        assert_eq!(response, json!({ "id": 3, "data": null }));
    }

    #[test]
    fn test_list_ports() {
        let (handler, enumerator) = handler();
        let mut dir = Directory::new();
        enumerator
            .ports
            .lock()
            .unwrap()
            .push(PortDescriptor::native("/dev/ttyS0"));

        let response = handler.handle(&mut dir, br#"{"action":"listPorts","id":"4"}"#);
        assert_eq!(
            response["data"],
            json!([{
                "id": "/dev/ttyS0",
                "name": "/dev/ttyS0",
                "transport": "NATIVE",
                "description": "Serial port",
            }])
        );

        *enumerator.fail.lock().unwrap() = true;
        let response = handler.handle(&mut dir, br#"{"action":"listPorts","id":"5"}"#);
        assert_eq!(response, json!({ "id": "5", "error": 60 }));
    }

    #[test]
    fn test_request_errors() {
        let (handler, _) = handler();
        let mut dir = Directory::new();

        assert_eq!(handler.handle(&mut dir, b"not json"), json!({ "error": 50 }));
        assert_eq!(handler.handle(&mut dir, br#"{"id":"1"}"#), json!({ "error": 50 }));
        assert_eq!(handler.handle(&mut dir, br#"{"action":"ping"}"#), json!({ "error": 50 }));
        assert_eq!(
            handler.handle(&mut dir, br#"{"action":"ping","id":{}}"#),
            json!({ "error": 50 })
        );
        assert_eq!(
            handler.handle(&mut dir, br#"{"action":"format","id":"6"}"#),
            json!({ "id": "6", "error": 51 })
        );
        assert_eq!(
            handler.handle(&mut dir, br#"{"action":"authGrant","id":"7"}"#),
            json!({ "id": "7", "error": 61 })
        );
        assert_eq!(
            handler.handle(&mut dir, br#"{"action":"authGrant","id":"8","port":5}"#),
            json!({ "id": "8", "error": 61 })
        );
        assert_eq!(
            handler.handle(&mut dir, br#"{"action":"authRevoke","id":"9"}"#),
            json!({ "id": "9", "error": 63 })
        );
        assert!(dir.is_empty());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ControlError::Parse.code(), 50);
        assert_eq!(ControlError::PingBuild.code(), 70);
        assert_eq!(ControlError::UnknownAction.to_string(), "unknown action (code 51)");
    }
}

// src/io/mock.rs
//
// In-memory serial devices for unit tests. Each port name maps to a shared
// `MockState` the test can script (RX chunks, injected failures) and inspect
// (calls made, bytes written, release flags).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    IoError, ModemSignals, PortDescriptor, PortEnumerator, PortOpener, RxWaiter, SerialDevice,
    WaitOutcome,
};

#[derive(Debug, Default)]
pub struct MockState {
    /// Operations in call order, e.g. "baud=115200"
    pub calls: Vec<String>,
    pub written: Vec<u8>,
    /// Chunks handed out by the waiter; an empty chunk is a spurious wake
    pub rx: VecDeque<Vec<u8>>,
    /// Returned by the waiter once `rx` is empty
    pub rx_error: Option<String>,
    /// Name of the operation that should fail ("open", "baud", "parity", "rts", ...)
    pub fail: Option<&'static str>,
    pub signals: ModemSignals,
    pub opened: usize,
    pub closed: bool,
    pub waiter_dropped: bool,
}

pub type SharedMock = Arc<Mutex<MockState>>;

#[derive(Clone, Default)]
pub struct MockOpener {
    ports: Arc<Mutex<HashMap<String, SharedMock>>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state for `port_name`, created on first use
    pub fn state(&self, port_name: &str) -> SharedMock {
        let mut ports = self.ports.lock().unwrap();
        ports
            .entry(port_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(MockState::default())))
            .clone()
    }
}

impl PortOpener for MockOpener {
    fn open(&self, port_name: &str) -> Result<Box<dyn SerialDevice>, IoError> {
        let state = self.state(port_name);
        {
            let mut s = state.lock().unwrap();
            if s.fail == Some("open") {
                return Err(IoError::connection(port_name, "open failed"));
            }
            s.opened += 1;
            s.closed = false;
            s.waiter_dropped = false;
        }
        Ok(Box::new(MockDevice {
            port_name: port_name.to_string(),
            state,
        }))
    }
}

pub struct MockDevice {
    port_name: String,
    state: SharedMock,
}

impl MockDevice {
    fn step(&self, op: &'static str, call: String) -> Result<(), IoError> {
        let mut s = self.state.lock().unwrap();
        if s.fail == Some(op) {
            return Err(IoError::configuration(&self.port_name, format!("{} failed", op)));
        }
        s.calls.push(call);
        Ok(())
    }
}

impl SerialDevice for MockDevice {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), IoError> {
        self.step("baud", format!("baud={}", baud_rate))
    }

    fn set_data_bits(&mut self, data_bits: u8) -> Result<(), IoError> {
        self.step("data_bits", format!("data_bits={}", data_bits))
    }

    fn set_parity(&mut self, parity: u8) -> Result<(), IoError> {
        self.step("parity", format!("parity={}", parity))
    }

    fn set_stop_bits(&mut self, stop_bits: u8) -> Result<(), IoError> {
        self.step("stop_bits", format!("stop_bits={}", stop_bits))
    }

    fn write_dtr(&mut self, level: bool) -> Result<(), IoError> {
        self.step("dtr", format!("dtr={}", level))
    }

    fn write_rts(&mut self, level: bool) -> Result<(), IoError> {
        self.step("rts", format!("rts={}", level))
    }

    fn read_signals(&mut self) -> Result<ModemSignals, IoError> {
        self.step("signals", "signals".to_string())?;
        Ok(self.state.lock().unwrap().signals)
    }

    fn set_break(&mut self) -> Result<(), IoError> {
        self.step("break", "break=on".to_string())
    }

    fn clear_break(&mut self) -> Result<(), IoError> {
        self.step("break", "break=off".to_string())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.step("write", format!("write={}", data.len()))?;
        self.state.lock().unwrap().written.extend_from_slice(data);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), IoError> {
        self.step("drain", "drain".to_string())
    }

    fn rx_waiter(&self) -> Result<Box<dyn RxWaiter>, IoError> {
        if self.state.lock().unwrap().fail == Some("waiter") {
            return Err(IoError::connection(&self.port_name, "waiter failed"));
        }
        Ok(Box::new(MockWaiter::new(&self.port_name, self.state.clone())))
    }

    fn close(self: Box<Self>) -> Result<(), IoError> {
        let mut s = self.state.lock().unwrap();
        if s.fail == Some("close") {
            return Err(IoError::connection(&self.port_name, "close failed"));
        }
        s.closed = true;
        Ok(())
    }
}

pub struct MockWaiter {
    port_name: String,
    state: SharedMock,
}

impl MockWaiter {
    pub fn new(port_name: &str, state: SharedMock) -> Self {
        Self {
            port_name: port_name.to_string(),
            state,
        }
    }
}

impl RxWaiter for MockWaiter {
    fn wait_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<WaitOutcome, IoError> {
        {
            let mut s = self.state.lock().unwrap();
            if let Some(mut chunk) = s.rx.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if chunk.len() > n {
                    s.rx.push_front(chunk.split_off(n));
                }
                return Ok(WaitOutcome::Data(n));
            }
            if let Some(message) = s.rx_error.take() {
                return Err(IoError::read(&self.port_name, message));
            }
        }
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(WaitOutcome::TimedOut)
    }
}

impl Drop for MockWaiter {
    fn drop(&mut self) {
        if let Ok(mut s) = self.state.lock() {
            s.waiter_dropped = true;
        }
    }
}

/// Enumerator returning a scripted list
#[derive(Clone, Default)]
pub struct MockEnumerator {
    pub ports: Arc<Mutex<Vec<PortDescriptor>>>,
    pub fail: Arc<Mutex<bool>>,
}

impl PortEnumerator for MockEnumerator {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, IoError> {
        if *self.fail.lock().unwrap() {
            return Err(IoError::connection("enumerator", "enumeration failed"));
        }
        Ok(self.ports.lock().unwrap().clone())
    }
}

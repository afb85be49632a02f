// src/io/mod.rs
//
// Device seam between the bridge and the OS serial stack.
//
// The gateway and sessions only ever talk to these traits. The native
// implementations live in `serial/` and are backed by the `serialport` crate;
// unit tests swap in the mocks from `mock.rs`.

use std::time::Duration;

mod error;
#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

pub use error::{IoError, IoErrorKind};
pub use serial::{PortDescriptor, Transport};

// ============================================================================
// Types
// ============================================================================

/// Input modem signal levels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModemSignals {
    pub cts: bool,
    pub dsr: bool,
    pub dcd: bool,
    pub ri: bool,
}

impl ModemSignals {
    pub const CTS: u8 = 0x01;
    pub const DSR: u8 = 0x02;
    pub const DCD: u8 = 0x04;
    pub const RI: u8 = 0x08;

    /// Bitmask as sent in the GET_SIGNALS response
    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.cts {
            bits |= Self::CTS;
        }
        if self.dsr {
            bits |= Self::DSR;
        }
        if self.dcd {
            bits |= Self::DCD;
        }
        if self.ri {
            bits |= Self::RI;
        }
        bits
    }
}

/// Result of one bounded wait on the RX-ready waiter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Nothing arrived within the timeout
    TimedOut,
    /// Woke up and read this many bytes (0 = spurious wake)
    Data(usize),
}

// ============================================================================
// Traits
// ============================================================================

/// An open serial port.
///
/// Line settings take the raw wire values from SET_CONFIG; implementations
/// reject values the hardware cannot represent with a configuration error.
pub trait SerialDevice: Send {
    fn port_name(&self) -> &str;

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), IoError>;
    fn set_data_bits(&mut self, data_bits: u8) -> Result<(), IoError>;
    /// 0 = none, 1 = odd, 2 = even, 3 = mark, 4 = space
    fn set_parity(&mut self, parity: u8) -> Result<(), IoError>;
    fn set_stop_bits(&mut self, stop_bits: u8) -> Result<(), IoError>;

    fn write_dtr(&mut self, level: bool) -> Result<(), IoError>;
    fn write_rts(&mut self, level: bool) -> Result<(), IoError>;
    fn read_signals(&mut self) -> Result<ModemSignals, IoError>;

    fn set_break(&mut self) -> Result<(), IoError>;
    fn clear_break(&mut self) -> Result<(), IoError>;

    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError>;
    /// Block until the output buffer has been transmitted
    fn drain(&mut self) -> Result<(), IoError>;

    /// Acquire a separate handle the reader thread waits on for RX data
    fn rx_waiter(&self) -> Result<Box<dyn RxWaiter>, IoError>;

    /// Release the OS handle
    fn close(self: Box<Self>) -> Result<(), IoError>;
}

/// The RX-ready wait object owned by a session's reader thread.
pub trait RxWaiter: Send {
    /// Wait up to `timeout` for incoming bytes and read what is available into `buf`.
    fn wait_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<WaitOutcome, IoError>;
}

/// Opens serial ports by OS name.
pub trait PortOpener: Send {
    fn open(&self, port_name: &str) -> Result<Box<dyn SerialDevice>, IoError>;
}

/// Lists the serial ports currently present.
pub trait PortEnumerator: Send {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, IoError>;
}

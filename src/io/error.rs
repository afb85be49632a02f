// src/io/error.rs
//
// Device error type shared by the serial drivers, the session reader and the
// gateway. Keeps the OS message text separate from the context so it can be
// forwarded verbatim in ERROR frames.

use std::fmt;

/// What part of the device interaction failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IoErrorKind {
    /// Opening the device or acquiring one of its handles
    Connection,
    /// Waiting for or reading RX data
    Read,
    /// Writing or draining TX data
    Write,
    /// Line settings, modem signals or break control
    Configuration,
    /// Malformed request payload
    Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoError {
    pub kind: IoErrorKind,
    /// Port name or protocol the error relates to
    pub context: String,
    /// Human-readable detail, usually the OS error text
    pub message: String,
}

impl IoError {
    fn new(kind: IoErrorKind, context: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.to_string(),
            message: message.into(),
        }
    }

    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        Self::new(IoErrorKind::Connection, device, message)
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        Self::new(IoErrorKind::Read, device, message)
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        Self::new(IoErrorKind::Write, device, message)
    }

    pub fn configuration(device: &str, message: impl Into<String>) -> Self {
        Self::new(IoErrorKind::Configuration, device, message)
    }

    pub fn protocol(protocol: &str, message: impl Into<String>) -> Self {
        Self::new(IoErrorKind::Protocol, protocol, message)
    }

    /// Text sent to the client after an error opcode.
    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            IoErrorKind::Connection => "connection error",
            IoErrorKind::Read => "read error",
            IoErrorKind::Write => "write error",
            IoErrorKind::Configuration => "configuration error",
            IoErrorKind::Protocol => "protocol error",
        };
        write!(f, "{} ({}): {}", what, self.context, self.message)
    }
}

impl std::error::Error for IoError {}

// src/io/serial/device.rs
//
// serialport-backed implementation of the device seam.
//
// The session keeps the primary handle for configuration and transmit; the
// reader thread gets a cloned handle (the RX waiter) whose read timeout is
// the bounded wait.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use super::utils;
use crate::io::{IoError, ModemSignals, PortOpener, RxWaiter, SerialDevice, WaitOutcome};

/// Line rate used until the client sends SET_CONFIG
const DEFAULT_BAUD_RATE: u32 = 9600;

/// Total time a single DATA write may take
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens OS serial ports through the serialport crate
#[derive(Clone, Debug, Default)]
pub struct NativeOpener;

impl PortOpener for NativeOpener {
    fn open(&self, port_name: &str) -> Result<Box<dyn SerialDevice>, IoError> {
        let port = serialport::new(port_name, DEFAULT_BAUD_RATE)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| IoError::connection(port_name, e.to_string()))?;

        tlog!("[Serial:{}] Opened at {} baud", port_name, DEFAULT_BAUD_RATE);

        Ok(Box::new(NativeDevice {
            port_name: port_name.to_string(),
            port,
        }))
    }
}

pub struct NativeDevice {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl NativeDevice {
    fn config_err(&self, e: impl ToString) -> IoError {
        IoError::configuration(&self.port_name, e.to_string())
    }
}

impl SerialDevice for NativeDevice {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), IoError> {
        self.port
            .set_baud_rate(baud_rate)
            .map_err(|e| self.config_err(e))
    }

    fn set_data_bits(&mut self, data_bits: u8) -> Result<(), IoError> {
        let bits = utils::to_serialport_data_bits(data_bits).map_err(|e| self.config_err(e))?;
        self.port.set_data_bits(bits).map_err(|e| self.config_err(e))
    }

    fn set_parity(&mut self, parity: u8) -> Result<(), IoError> {
        let parity = utils::to_serialport_parity(parity).map_err(|e| self.config_err(e))?;
        self.port.set_parity(parity).map_err(|e| self.config_err(e))
    }

    fn set_stop_bits(&mut self, stop_bits: u8) -> Result<(), IoError> {
        let bits = utils::to_serialport_stop_bits(stop_bits).map_err(|e| self.config_err(e))?;
        self.port.set_stop_bits(bits).map_err(|e| self.config_err(e))
    }

    fn write_dtr(&mut self, level: bool) -> Result<(), IoError> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(|e| self.config_err(e))
    }

    fn write_rts(&mut self, level: bool) -> Result<(), IoError> {
        self.port
            .write_request_to_send(level)
            .map_err(|e| self.config_err(e))
    }

    fn read_signals(&mut self) -> Result<ModemSignals, IoError> {
        let cts = self.port.read_clear_to_send().map_err(|e| self.config_err(e))?;
        let dsr = self.port.read_data_set_ready().map_err(|e| self.config_err(e))?;
        let dcd = self.port.read_carrier_detect().map_err(|e| self.config_err(e))?;
        let ri = self.port.read_ring_indicator().map_err(|e| self.config_err(e))?;
        Ok(ModemSignals { cts, dsr, dcd, ri })
    }

    fn set_break(&mut self) -> Result<(), IoError> {
        self.port.set_break().map_err(|e| self.config_err(e))
    }

    fn clear_break(&mut self) -> Result<(), IoError> {
        self.port.clear_break().map_err(|e| self.config_err(e))
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        write_with_deadline(&mut self.port, data, WRITE_TIMEOUT)
            .map_err(|e| IoError::write(&self.port_name, e.to_string()))
    }

    fn drain(&mut self) -> Result<(), IoError> {
        // flush() waits for the OS output queue to empty (tcdrain / FlushFileBuffers)
        self.port
            .flush()
            .map_err(|e| IoError::write(&self.port_name, e.to_string()))
    }

    fn rx_waiter(&self) -> Result<Box<dyn RxWaiter>, IoError> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| IoError::connection(&self.port_name, e.to_string()))?;
        Ok(Box::new(NativeRxWaiter {
            port_name: self.port_name.clone(),
            port,
            timeout: None,
        }))
    }

    fn close(self: Box<Self>) -> Result<(), IoError> {
        // serialport releases the handle (and exclusive lock) on drop
        tlog!("[Serial:{}] Closed", self.port_name);
        drop(self.port);
        Ok(())
    }
}

/// Write all of `data`, retrying per-call timeouts until `limit` has passed.
///
/// On Windows a cloned handle shares its COMMTIMEOUTS with the original, so
/// the reader's poll interval also caps each individual write call. The
/// overall limit is enforced here rather than through the handle timeout.
fn write_with_deadline<W: Write + ?Sized>(
    port: &mut W,
    data: &[u8],
    limit: Duration,
) -> std::io::Result<()> {
    let deadline = Instant::now() + limit;
    let mut written = 0;
    while written < data.len() {
        match port.write(&data[written..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "device accepted no data",
                ))
            }
            Ok(n) => written += n,
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) && Instant::now() < deadline => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub struct NativeRxWaiter {
    port_name: String,
    port: Box<dyn SerialPort>,
    /// Timeout currently programmed into the handle
    timeout: Option<Duration>,
}

impl RxWaiter for NativeRxWaiter {
    fn wait_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<WaitOutcome, IoError> {
        if self.timeout != Some(timeout) {
            self.port
                .set_timeout(timeout)
                .map_err(|e| IoError::read(&self.port_name, e.to_string()))?;
            self.timeout = Some(timeout);
        }

        match self.port.read(buf) {
            Ok(n) => Ok(WaitOutcome::Data(n)),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(WaitOutcome::TimedOut)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(WaitOutcome::Data(0)),
            Err(e) => Err(IoError::read(&self.port_name, e.to_string())),
        }
    }
}

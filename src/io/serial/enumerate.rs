// src/io/serial/enumerate.rs
//
// Port listing for the `listPorts` control action.
//
// Each descriptor carries a transport-specific `id` that does not depend on
// the OS-assigned name where the hardware reports enough identity to avoid it
// (USB serial number, Bluetooth address).

use serde::Serialize;

use crate::io::{IoError, PortEnumerator};

/// Physical/bus category of a serial device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transport {
    Native,
    Usb,
    Bluetooth,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UsbDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u8>,
    pub vid: u16,
    pub pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BluetoothDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One entry of the `listPorts` response
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    pub id: String,
    pub name: String,
    pub transport: Transport,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb: Option<UsbDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bluetooth: Option<BluetoothDetails>,
}

impl PortDescriptor {
    pub fn native(name: &str) -> Self {
        Self {
            id: name.to_string(),
            name: name.to_string(),
            transport: Transport::Native,
            description: "Serial port".to_string(),
            usb: None,
            bluetooth: None,
        }
    }

    pub fn usb(name: &str, usb: UsbDetails) -> Self {
        let description = usb
            .product
            .clone()
            .or_else(|| usb.manufacturer.clone())
            .unwrap_or_else(|| name.to_string());
        Self {
            id: usb_port_id(name, usb.vid, usb.pid, usb.serial.as_deref()),
            name: name.to_string(),
            transport: Transport::Usb,
            description,
            usb: Some(usb),
            bluetooth: None,
        }
    }

    pub fn bluetooth(name: &str, bluetooth: BluetoothDetails) -> Self {
        Self {
            id: bluetooth_port_id(name, bluetooth.address.as_deref()),
            name: name.to_string(),
            transport: Transport::Bluetooth,
            description: "Bluetooth serial port".to_string(),
            usb: None,
            bluetooth: Some(bluetooth),
        }
    }
}

/// Stable id for a USB serial adapter.
///
/// With a serial number the id is independent of the OS name; without one the
/// name is the only thing telling two identical adapters apart.
pub fn usb_port_id(name: &str, vid: u16, pid: u16, serial: Option<&str>) -> String {
    match serial.filter(|s| !s.is_empty()) {
        Some(sn) => format!("USB#VID={:04X}#PID={:04X}#SN={}", vid, pid, sn),
        None => format!("USB#VID={:04X}#PID={:04X}#PORT={}", vid, pid, name),
    }
}

/// Stable id for a Bluetooth serial port, falling back to the name
pub fn bluetooth_port_id(name: &str, address: Option<&str>) -> String {
    match address.filter(|a| !a.is_empty()) {
        Some(addr) => format!("BT#ADDR={}", addr),
        None => name.to_string(),
    }
}

fn describe(info: serialport::SerialPortInfo) -> PortDescriptor {
    match info.port_type {
        serialport::SerialPortType::UsbPort(usb) => PortDescriptor::usb(
            &info.port_name,
            UsbDetails {
                bus: None,
                address: None,
                vid: usb.vid,
                pid: usb.pid,
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial: usb.serial_number,
            },
        ),
        serialport::SerialPortType::BluetoothPort => {
            PortDescriptor::bluetooth(&info.port_name, BluetoothDetails::default())
        }
        serialport::SerialPortType::PciPort | serialport::SerialPortType::Unknown => {
            PortDescriptor::native(&info.port_name)
        }
    }
}

/// On macOS only the /dev/cu.* (calling unit) devices are listed.
/// The /dev/tty.* twins block on open waiting for carrier detect.
fn is_listed(_port_name: &str) -> bool {
    #[cfg(target_os = "macos")]
    {
        !_port_name.starts_with("/dev/tty.")
    }
    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}

/// Lists ports through serialport::available_ports
#[derive(Clone, Debug, Default)]
pub struct NativeEnumerator;

impl PortEnumerator for NativeEnumerator {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, IoError> {
        let ports = serialport::available_ports()
            .map_err(|e| IoError::connection("enumerator", format!("Failed to enumerate ports: {}", e)))?;

        Ok(ports
            .into_iter()
            .filter(|p| is_listed(&p.port_name))
            .map(describe)
            .collect())
    }
}

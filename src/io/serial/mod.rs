// src/io/serial/mod.rs
//
// Serial port driver for the bridge.
//
// Features:
// - Native device/enumerator backed by the serialport crate
// - Per-port session with a dedicated reader thread
// - Stable port ids for listPorts

mod device;
mod enumerate;
pub(crate) mod reader;
mod session;
pub(crate) mod utils;

pub use device::NativeOpener;
pub use enumerate::{
    bluetooth_port_id, usb_port_id, BluetoothDetails, NativeEnumerator, PortDescriptor, Transport,
    UsbDetails,
};
pub use reader::READ_CHUNK;
pub use session::{SerialSession, SessionLink};

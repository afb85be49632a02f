// src/io/serial/utils.rs
//
// Conversions from SET_CONFIG wire values to the serialport crate's types.
// Values the crate cannot represent are rejected rather than defaulted, so a
// client asking for 9 data bits gets an ERROR instead of silently running 8.

use serialport::{DataBits, Parity, StopBits};

/// Parity codes as sent by the client
pub mod parity_code {
    pub const NONE: u8 = 0;
    pub const ODD: u8 = 1;
    pub const EVEN: u8 = 2;
    pub const MARK: u8 = 3;
    pub const SPACE: u8 = 4;
}

/// Convert a data bits count (5-8) to serialport's DataBits
pub fn to_serialport_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(format!("Invalid data bits: {}", other)),
    }
}

/// Convert a parity code to serialport's Parity
pub fn to_serialport_parity(code: u8) -> Result<Parity, String> {
    match code {
        parity_code::NONE => Ok(Parity::None),
        parity_code::ODD => Ok(Parity::Odd),
        parity_code::EVEN => Ok(Parity::Even),
        parity_code::MARK | parity_code::SPACE => {
            Err(format!("Unsupported parity: {} (mark/space)", code))
        }
        other => Err(format!("Invalid parity: {}", other)),
    }
}

/// Convert a stop bits count (1 or 2) to serialport's StopBits
pub fn to_serialport_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(format!("Invalid stop bits: {}", other)),
    }
}

/// Short `8-N-1` style summary for logs
pub fn line_summary(baud_rate: u32, data_bits: u8, parity: u8, stop_bits: u8) -> String {
    let p = match parity {
        parity_code::NONE => 'N',
        parity_code::ODD => 'O',
        parity_code::EVEN => 'E',
        parity_code::MARK => 'M',
        parity_code::SPACE => 'S',
        _ => '?',
    };
    format!("{} baud ({}-{}-{})", baud_rate, data_bits, p, stop_bits)
}

// ============================================================================
// Tests
// ============================================================================

// src/gateway/codec.rs
//
// Binary WebSocket protocol codec.
//
// Frame format:
//   [Opcode-1byte][Payload...]
//
// Client -> server payloads:
//   OPEN        [Token...][0x00]
//   SET_CONFIG  [Baudrate-4bytes-LE][DataBits][Parity][StopBits]
//   SET_SIGNALS [DTR][RTS]
//   DATA        [Drain][Data...]
//   CLOSE, GET_SIGNALS, START_BREAK, END_BREAK, DRAIN: empty
//
// Server -> client:
//   OK [Signals]?   DATA [Data...]   ERROR/ERR_* [Message...]?

use crate::io::IoError;

/// Protocol constants
pub mod constants {
    /// SET_CONFIG payload: baudrate + data bits + parity + stop bits
    pub const SET_CONFIG_LEN: usize = 4 + 1 + 1 + 1;
    /// SET_SIGNALS payload: dtr + rts
    pub const SET_SIGNALS_LEN: usize = 2;
    /// DATA payload header: drain flag
    pub const DATA_HEADER_LEN: usize = 1;
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Ok = 0,
    Open = 10,
    Close = 11,
    SetConfig = 20,
    SetSignals = 30,
    GetSignals = 31,
    StartBreak = 40,
    EndBreak = 41,
    Data = 50,
    Drain = 51,
    Error = 128,
    ErrOpcode = 129,
    ErrAuth = 130,
    ErrIsOpen = 131,
    ErrNotOpen = 132,
    ErrReader = 133,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Opcode::Ok,
            10 => Opcode::Open,
            11 => Opcode::Close,
            20 => Opcode::SetConfig,
            30 => Opcode::SetSignals,
            31 => Opcode::GetSignals,
            40 => Opcode::StartBreak,
            41 => Opcode::EndBreak,
            50 => Opcode::Data,
            51 => Opcode::Drain,
            128 => Opcode::Error,
            129 => Opcode::ErrOpcode,
            130 => Opcode::ErrAuth,
            131 => Opcode::ErrIsOpen,
            132 => Opcode::ErrNotOpen,
            133 => Opcode::ErrReader,
            _ => return None,
        })
    }
}

/// Line settings requested by SET_CONFIG, in wire encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    /// 0 = none, 1 = odd, 2 = even
    pub parity: u8,
    pub stop_bits: u8,
}

/// A decoded client frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request<'a> {
    Open { token: &'a str },
    Close,
    SetConfig(LineConfig),
    SetSignals { dtr: bool, rts: bool },
    GetSignals,
    StartBreak,
    EndBreak,
    Data { drain: bool, payload: &'a [u8] },
    Drain,
    /// Anything a client may not send
    Unknown(u8),
}

impl<'a> Request<'a> {
    /// Decode a client frame. Fixed-size payloads are length-checked before any
    /// field is read; an empty frame is a protocol error.
    pub fn decode(frame: &'a [u8]) -> Result<Self, IoError> {
        use constants::*;

        let Some((&opcode, payload)) = frame.split_first() else {
            return Err(IoError::protocol("ws", "empty frame"));
        };

        let request = match Opcode::from_u8(opcode) {
            Some(Opcode::Open) => Request::Open {
                token: decode_token(payload)?,
            },
            Some(Opcode::Close) => Request::Close,
            Some(Opcode::SetConfig) => {
                require_len(opcode, payload, SET_CONFIG_LEN)?;
                Request::SetConfig(LineConfig {
                    baud_rate: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                    data_bits: payload[4],
                    parity: payload[5],
                    stop_bits: payload[6],
                })
            }
            Some(Opcode::SetSignals) => {
                require_len(opcode, payload, SET_SIGNALS_LEN)?;
                Request::SetSignals {
                    dtr: payload[0] != 0,
                    rts: payload[1] != 0,
                }
            }
            Some(Opcode::GetSignals) => Request::GetSignals,
            Some(Opcode::StartBreak) => Request::StartBreak,
            Some(Opcode::EndBreak) => Request::EndBreak,
            Some(Opcode::Data) => {
                require_len(opcode, payload, DATA_HEADER_LEN)?;
                Request::Data {
                    drain: payload[0] != 0,
                    payload: &payload[DATA_HEADER_LEN..],
                }
            }
            Some(Opcode::Drain) => Request::Drain,
            _ => Request::Unknown(opcode),
        };
        Ok(request)
    }
}

fn require_len(opcode: u8, payload: &[u8], needed: usize) -> Result<(), IoError> {
    if payload.len() < needed {
        return Err(IoError::protocol(
            "ws",
            format!(
                "opcode {} payload too short: {} bytes, need {}",
                opcode,
                payload.len(),
                needed
            ),
        ));
    }
    Ok(())
}

/// Extract the NUL-terminated token from an OPEN payload.
/// The terminator must lie within the frame and the token must be UTF-8.
pub fn decode_token(payload: &[u8]) -> Result<&str, IoError> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| IoError::protocol("ws", "token is not NUL-terminated"))?;
    std::str::from_utf8(&payload[..end])
        .map_err(|_| IoError::protocol("ws", "token is not valid UTF-8"))
}

// ============================================================================
// Responses
// ============================================================================

/// Bare status frame
pub fn status(opcode: Opcode) -> Vec<u8> {
    vec![opcode as u8]
}

pub fn ok() -> Vec<u8> {
    status(Opcode::Ok)
}

/// GET_SIGNALS response: OK followed by the signal bitmask
pub fn ok_with_signals(bits: u8) -> Vec<u8> {
    vec![Opcode::Ok as u8, bits]
}

/// Status frame with a human-readable message filling the rest of the frame
pub fn status_with_message(opcode: Opcode, message: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + message.len());
    frame.push(opcode as u8);
    frame.extend_from_slice(message.as_bytes());
    frame
}

/// Asynchronous RX data frame
pub fn data(bytes: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + bytes.len());
    frame.push(Opcode::Data as u8);
    frame.extend_from_slice(bytes);
    frame
}

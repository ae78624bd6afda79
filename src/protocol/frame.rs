//! Modbus RTU frame construction and response validation.
//!
//! Request (8 bytes): `slave | fn | addr (BE) | count-or-value (BE) | CRC (LE)`.
//! Read response: `slave | 0x03 | byte_count | registers (BE) | CRC (LE)`.
//! Exception response: `slave | fn | 0x80 | code | CRC (LE)`.

use crate::error::{Fault, Result};
use crate::registers::{MAX_SELECTION, RegisterId, RegisterSelection};

use super::crc::{check, crc16_modbus};

pub const FN_READ_HOLDING: u8 = 0x03;
pub const FN_WRITE_SINGLE: u8 = 0x06;
const EXCEPTION_BIT: u8 = 0x80;

/// Registers readable in one request, bounded by the catalogue span.
pub const MAX_SPAN: u16 = 125;

pub type RequestFrame = [u8; 8];

/// Values projected back onto the requested selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedValues {
    pub values: heapless::Vec<u16, MAX_SELECTION>,
}

impl DecodedValues {
    pub fn count(&self) -> usize {
        self.values.len()
    }
}

fn finish(mut frame: RequestFrame) -> RequestFrame {
    let crc = crc16_modbus(&frame[..6]).to_le_bytes();
    frame[6] = crc[0];
    frame[7] = crc[1];
    frame
}

/// Read-Holding-Registers request for `count` registers from `start`.
pub fn build_read_frame(slave: u8, start: u16, count: u16) -> RequestFrame {
    let a = start.to_be_bytes();
    let c = count.to_be_bytes();
    finish([slave, FN_READ_HOLDING, a[0], a[1], c[0], c[1], 0, 0])
}

/// Write-Single-Register request.
pub fn build_write_frame(slave: u8, address: u16, value: u16) -> RequestFrame {
    let a = address.to_be_bytes();
    let v = value.to_be_bytes();
    finish([slave, FN_WRITE_SINGLE, a[0], a[1], v[0], v[1], 0, 0])
}

/// Uppercase hex, as the simulator expects.
pub fn encode_hex(frame: &[u8]) -> String {
    hex::encode_upper(frame)
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text.trim()).map_err(|_| Fault::CorruptFrame)
}

/// Common checks for any response: length, CRC, exception, function code.
fn validate_envelope(frame: &[u8], slave: u8, function: u8) -> Result<()> {
    if frame.len() < 4 {
        return Err(Fault::CorruptFrame);
    }
    if !check(frame) {
        return Err(Fault::CrcError);
    }
    if frame[1] & EXCEPTION_BIT != 0 {
        if frame.len() != 5 {
            return Err(Fault::CorruptFrame);
        }
        return Err(Fault::ModbusException(frame[2]));
    }
    if frame[1] != function || frame[0] != slave {
        return Err(Fault::CorruptFrame);
    }
    Ok(())
}

/// Validate a read response and return the raw register words of the span.
pub fn parse_read_response(frame: &[u8], slave: u8, count: u16) -> Result<Vec<u16>> {
    validate_envelope(frame, slave, FN_READ_HOLDING)?;
    let expected = usize::from(count) * 2;
    if frame.len() < 5 || usize::from(frame[2]) != expected || frame.len() != 3 + expected + 2 {
        return Err(Fault::CorruptFrame);
    }
    Ok(frame[3..3 + expected]
        .chunks_exact(2)
        .map(|w| u16::from_be_bytes([w[0], w[1]]))
        .collect())
}

/// Validate a write response: a successful write echoes the request.
pub fn parse_write_response(frame: &[u8], request: &RequestFrame) -> Result<()> {
    validate_envelope(frame, request[0], FN_WRITE_SINGLE)?;
    if frame != request {
        return Err(Fault::CorruptFrame);
    }
    Ok(())
}

/// Project span words starting at `span_start` back onto `selection` order.
/// Registers outside the span read as 0.
pub fn project(span_start: u16, words: &[u16], selection: &RegisterSelection) -> DecodedValues {
    let values = selection
        .iter()
        .map(|id: RegisterId| {
            id.address()
                .checked_sub(span_start)
                .and_then(|offset| words.get(usize::from(offset)))
                .copied()
                .unwrap_or(0)
        })
        .collect();
    DecodedValues { values }
}

/// Build the response a well-behaved slave returns for a read of `words`.
pub fn build_read_response(slave: u8, words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + words.len() * 2);
    out.push(slave);
    out.push(FN_READ_HOLDING);
    out.push((words.len() * 2) as u8);
    for w in words {
        out.extend_from_slice(&w.to_be_bytes());
    }
    let crc = crc16_modbus(&out).to_le_bytes();
    out.extend_from_slice(&crc);
    out
}

/// Build an exception response for `function` with `code`.
pub fn build_exception_response(slave: u8, function: u8, code: u8) -> Vec<u8> {
    let mut out = vec![slave, function | EXCEPTION_BIT, code];
    let crc = crc16_modbus(&out).to_le_bytes();
    out.extend_from_slice(&crc);
    out
}

//! Bit-packed (tag `0x01`) and raw (tag `0x00`) encodings.
//!
//! ```text
//! bit-pack: [0x01][bits_per_value][count u16 LE][packed, MSB first]
//! raw:      [0x00]([count u16 LE] when count > 8)[u16 LE × count]
//! ```

use crate::error::{Fault, Result};

use super::bits::{BitReader, BitWriter, bits_for};
use super::{TAG_BITPACK, TAG_RAW};

/// Raw packets up to this many values carry no count header.
const RAW_HEADERLESS_MAX: usize = 8;

pub fn encode_raw(values: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + values.len() * 2);
    out.push(TAG_RAW);
    if values.len() > RAW_HEADERLESS_MAX {
        out.extend_from_slice(&(values.len() as u16).to_le_bytes());
    }
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_raw(bytes: &[u8]) -> Result<Vec<u16>> {
    if bytes.first() != Some(&TAG_RAW) {
        return Err(Fault::CompressionFailure);
    }
    let body = if bytes.len() <= 1 + RAW_HEADERLESS_MAX * 2 {
        &bytes[1..]
    } else {
        let count = usize::from(u16::from_le_bytes([bytes[1], bytes[2]]));
        let body = &bytes[3..];
        if count <= RAW_HEADERLESS_MAX || body.len() != count * 2 {
            return Err(Fault::CompressionFailure);
        }
        body
    };
    if body.len() % 2 != 0 {
        return Err(Fault::CompressionFailure);
    }
    Ok(body
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Bit-pack when that is smaller than raw, otherwise raw.
pub fn encode(values: &[u16]) -> Option<Vec<u8>> {
    if values.len() > usize::from(u16::MAX) {
        return None;
    }
    let max = values.iter().copied().max().unwrap_or(0);
    let bits = bits_for(u32::from(max));
    let packed_len = 4 + (values.len() * usize::from(bits)).div_ceil(8);
    let raw = encode_raw(values);
    if packed_len >= raw.len() {
        return Some(raw);
    }

    let mut out = Vec::with_capacity(packed_len);
    out.push(TAG_BITPACK);
    out.push(bits);
    out.extend_from_slice(&(values.len() as u16).to_le_bytes());
    let mut w = BitWriter::new();
    for &v in values {
        w.write(u32::from(v), bits);
    }
    out.extend_from_slice(&w.finish());
    Some(out)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<u16>> {
    if bytes.len() < 4 || bytes[0] != TAG_BITPACK {
        return Err(Fault::CompressionFailure);
    }
    let bits = bytes[1];
    if bits == 0 || bits > 16 {
        return Err(Fault::CompressionFailure);
    }
    let count = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));
    let mut r = BitReader::new(&bytes[4..]);
    (0..count)
        .map(|_| {
            r.read(bits)
                .map(|v| v as u16)
                .ok_or(Fault::CompressionFailure)
        })
        .collect()
}

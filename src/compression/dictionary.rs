//! Dictionary + bitmask codec (tag `0xD0`).
//!
//! Distinct sample rows become dictionary patterns in order of first
//! appearance; each sample is then stored as a `⌈log2(patterns)⌉`-bit index.
//!
//! `[0xD0][samples u8][patterns u8][pattern rows, f32 LE per register][indices]`

use crate::error::{Fault, Result};

use super::bits::{BitReader, BitWriter, index_bits};
use super::TAG_DICTIONARY;

const HEADER_LEN: usize = 3;

/// Encode, or `None` when the layout cannot hold the batch or would not
/// beat the raw size.
pub fn encode(values: &[u16], register_count: usize) -> Option<Vec<u8>> {
    if register_count == 0 || values.is_empty() || values.len() % register_count != 0 {
        return None;
    }
    let samples = values.len() / register_count;
    if samples > usize::from(u8::MAX) {
        return None;
    }

    let mut patterns: Vec<&[u16]> = Vec::new();
    let mut indices = Vec::with_capacity(samples);
    for row in values.chunks_exact(register_count) {
        let idx = match patterns.iter().position(|p| *p == row) {
            Some(i) => i,
            None => {
                if patterns.len() == usize::from(u8::MAX) {
                    return None;
                }
                patterns.push(row);
                patterns.len() - 1
            }
        };
        indices.push(idx);
    }

    let bits = index_bits(patterns.len());
    let size = HEADER_LEN
        + patterns.len() * register_count * 4
        + (samples * usize::from(bits)).div_ceil(8);
    if size >= values.len() * 2 {
        return None;
    }

    let mut out = Vec::with_capacity(size);
    out.push(TAG_DICTIONARY);
    out.push(samples as u8);
    out.push(patterns.len() as u8);
    for pattern in &patterns {
        for &v in *pattern {
            out.extend_from_slice(&f32::from(v).to_le_bytes());
        }
    }
    let mut writer = BitWriter::new();
    for idx in indices {
        writer.write(idx as u32, bits);
    }
    out.extend_from_slice(&writer.finish());
    Some(out)
}

fn pattern_value(raw: [u8; 4]) -> Result<u16> {
    let v = f32::from_le_bytes(raw);
    if v.fract() != 0.0 || !(0.0..=65535.0).contains(&v) {
        return Err(Fault::CompressionFailure);
    }
    Ok(v as u16)
}

pub fn decode(bytes: &[u8], register_count: usize) -> Result<Vec<u16>> {
    if bytes.len() < HEADER_LEN || bytes[0] != TAG_DICTIONARY || register_count == 0 {
        return Err(Fault::CompressionFailure);
    }
    let samples = usize::from(bytes[1]);
    let num_patterns = usize::from(bytes[2]);
    if num_patterns == 0 {
        return Err(Fault::CompressionFailure);
    }
    let table_len = num_patterns * register_count * 4;
    let table = bytes
        .get(HEADER_LEN..HEADER_LEN + table_len)
        .ok_or(Fault::CompressionFailure)?;
    let patterns = table
        .chunks_exact(4)
        .map(|c| pattern_value([c[0], c[1], c[2], c[3]]))
        .collect::<Result<Vec<u16>>>()?;

    let bits = index_bits(num_patterns);
    let mut reader = BitReader::new(&bytes[HEADER_LEN + table_len..]);
    let mut out = Vec::with_capacity(samples * register_count);
    for _ in 0..samples {
        let idx = reader.read(bits).ok_or(Fault::CompressionFailure)? as usize;
        if idx >= num_patterns {
            return Err(Fault::CompressionFailure);
        }
        out.extend_from_slice(&patterns[idx * register_count..(idx + 1) * register_count]);
    }
    Ok(out)
}

//! Temporal delta codec (tags `0x70` base, `0x71` delta).
//!
//! The first sample of a batch is a base frame carrying the register ids and
//! raw values.  Every following sample is a delta frame holding, per
//! register, the difference to the linear prediction `2·prev − prev2`
//! (or `prev` while only one frame is known).
//!
//! ```text
//! base:  [0x70][count][id × count][u16 LE × count]
//! delta: [0x71][varint × count]
//! varint: 0sxxxxxx            |Δ| ≤ 63
//!         0x80 i8             |Δ| ≤ 127
//!         0x81 i16 LE         otherwise
//! ```
//!
//! Deltas wrap modulo 2^16 so every value is representable.

use heapless::Deque;

use crate::error::{Fault, Result};
use crate::registers::{MAX_SELECTION, RegisterSelection};

use super::{TAG_TEMPORAL_BASE, TAG_TEMPORAL_DELTA};

/// Past frames kept for prediction.
pub const WINDOW: usize = 8;

const MARK_I8: u8 = 0x80;
const MARK_I16: u8 = 0x81;

type Frame = heapless::Vec<u16, MAX_SELECTION>;

/// Sliding window of past frames keyed by the selection that produced them.
struct History {
    frames: Deque<Frame, WINDOW>,
}

impl History {
    fn new() -> Self {
        Self { frames: Deque::new() }
    }

    fn push(&mut self, frame: Frame) {
        if self.frames.is_full() {
            self.frames.pop_front();
        }
        let _ = self.frames.push_back(frame);
    }

    fn predict(&self, i: usize) -> u16 {
        let mut recent = self.frames.iter().rev();
        match (recent.next(), recent.next()) {
            (Some(prev), Some(prev2)) => {
                let p = 2 * i32::from(prev[i]) - i32::from(prev2[i]);
                p.clamp(0, i32::from(u16::MAX)) as u16
            }
            (Some(prev), None) => prev[i],
            _ => 0,
        }
    }
}

fn write_varint(out: &mut Vec<u8>, delta: i16) {
    if (-63..=63).contains(&delta) {
        out.push((delta as u8) & 0x7F);
    } else if let Ok(small) = i8::try_from(delta) {
        out.push(MARK_I8);
        out.push(small as u8);
    } else {
        out.push(MARK_I16);
        out.extend_from_slice(&delta.to_le_bytes());
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<i16> {
    let b = *bytes.get(*pos).ok_or(Fault::CompressionFailure)?;
    *pos += 1;
    match b {
        MARK_I8 => {
            let v = *bytes.get(*pos).ok_or(Fault::CompressionFailure)?;
            *pos += 1;
            Ok(i16::from(v as i8))
        }
        MARK_I16 => {
            let raw = bytes.get(*pos..*pos + 2).ok_or(Fault::CompressionFailure)?;
            *pos += 2;
            Ok(i16::from_le_bytes([raw[0], raw[1]]))
        }
        b if b & 0x80 == 0 => Ok(i16::from(((b << 1) as i8) >> 1)),
        _ => Err(Fault::CompressionFailure),
    }
}

/// Encode a batch.  The window starts empty so the packet decodes on its own.
pub fn encode(values: &[u16], selection: &RegisterSelection) -> Option<Vec<u8>> {
    let count = selection.len();
    if count == 0 || values.is_empty() || values.len() % count != 0 {
        return None;
    }
    let mut history = History::new();
    let mut out = Vec::with_capacity(values.len() * 2);

    for (n, row) in values.chunks_exact(count).enumerate() {
        if n == 0 {
            out.push(TAG_TEMPORAL_BASE);
            out.push(count as u8);
            out.extend(selection.iter().map(|id| id as u8));
            for v in row {
                out.extend_from_slice(&v.to_le_bytes());
            }
        } else {
            out.push(TAG_TEMPORAL_DELTA);
            for (i, &v) in row.iter().enumerate() {
                let delta = v.wrapping_sub(history.predict(i)) as i16;
                write_varint(&mut out, delta);
            }
        }
        history.push(row.iter().copied().collect());
    }
    Some(out)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<u16>> {
    if bytes.len() < 2 || bytes[0] != TAG_TEMPORAL_BASE {
        return Err(Fault::CompressionFailure);
    }
    let count = usize::from(bytes[1]);
    if count == 0 || count > MAX_SELECTION {
        return Err(Fault::CompressionFailure);
    }
    let mut pos = 2 + count;
    let raw = bytes
        .get(pos..pos + count * 2)
        .ok_or(Fault::CompressionFailure)?;
    pos += count * 2;

    let mut history = History::new();
    let base: Frame = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let mut out: Vec<u16> = base.iter().copied().collect();
    history.push(base);

    while pos < bytes.len() {
        if bytes[pos] != TAG_TEMPORAL_DELTA {
            return Err(Fault::CompressionFailure);
        }
        pos += 1;
        let mut frame = Frame::new();
        for i in 0..count {
            let delta = read_varint(bytes, &mut pos)?;
            let v = history.predict(i).wrapping_add(delta as u16);
            // Cannot overflow: count <= MAX_SELECTION.
            let _ = frame.push(v);
        }
        out.extend_from_slice(&frame);
        history.push(frame);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterId;

    const ROW: [u16; 10] = [2400, 180, 50, 4200, 70, 600, 70, 35, 100, 1500];

    fn ramp(samples: u16, step: u16) -> Vec<u16> {
        (0..samples)
            .flat_map(|k| ROW.iter().map(move |v| v + k * step))
            .collect()
    }

    #[test]
    fn linear_ramp_is_one_byte_per_delta() {
        let values = ramp(7, 10);
        let bytes = encode(&values, &RegisterSelection::all()).unwrap();
        assert_eq!(bytes.len(), 32 + 6 * 11);
        assert_eq!(bytes[0], 0x70);
        assert_eq!(bytes[32], 0x71);
        assert_eq!(decode(&bytes).unwrap(), values);
    }

    #[test]
    fn varint_widths() {
        let mut out = Vec::new();
        write_varint(&mut out, -63);
        write_varint(&mut out, 100);
        write_varint(&mut out, -20_000);
        assert_eq!(out.len(), 1 + 2 + 3);
        let mut pos = 0;
        assert_eq!(read_varint(&out, &mut pos), Ok(-63));
        assert_eq!(read_varint(&out, &mut pos), Ok(100));
        assert_eq!(read_varint(&out, &mut pos), Ok(-20_000));
    }

    #[test]
    fn extreme_jumps_round_trip() {
        let sel = RegisterSelection::new(&[RegisterId::Vac1, RegisterId::Pac]).unwrap();
        let values = vec![0, 65535, 65535, 0, 0, 65535, 12, 40_000];
        let bytes = encode(&values, &sel).unwrap();
        assert_eq!(decode(&bytes).unwrap(), values);
    }

    #[test]
    fn packet_starting_with_delta_is_rejected() {
        assert_eq!(decode(&[0x71, 0x00]), Err(Fault::CompressionFailure));
    }
}

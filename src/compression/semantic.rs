//! Semantic RLE codec (tag `0x50`).
//!
//! Registers are grouped by semantic class.  Each column is then encoded as
//! runs: a run keeps growing while values stay within the class tolerance of
//! the run's first value, and stores the offsets when any value differs.
//!
//! ```text
//! [0x50][samples u8][groups u8]
//!   per group: [type_id][count][position × count][bit_width]
//! bit stream, group by group, column by column:
//!   [run_len 8][base w][banded 1][if banded: (run_len−1) × residual]
//! ```
//! A residual is `v − base + tolerance`, `bits_for(2·tolerance)` bits wide.

use crate::error::{Fault, Result};
use crate::registers::{RegisterSelection, SemanticClass};

use super::bits::{BitReader, BitWriter, bits_for};
use super::TAG_SEMANTIC;

const MAX_RUN: usize = u8::MAX as usize;

struct Group {
    class: SemanticClass,
    positions: heapless::Vec<u8, { crate::registers::MAX_SELECTION }>,
    width: u8,
}

fn column(values: &[u16], stride: usize, pos: usize) -> impl Iterator<Item = u16> + '_ {
    values.iter().skip(pos).step_by(stride).copied()
}

fn residual_bits(tolerance: u16) -> u8 {
    bits_for(u32::from(tolerance) * 2)
}

pub fn encode(values: &[u16], selection: &RegisterSelection) -> Option<Vec<u8>> {
    let count = selection.len();
    if count == 0 || values.is_empty() || values.len() % count != 0 {
        return None;
    }
    let samples = values.len() / count;
    if samples > usize::from(u8::MAX) {
        return None;
    }

    let mut groups: Vec<Group> = Vec::new();
    for class in SemanticClass::ALL {
        let positions: heapless::Vec<u8, { crate::registers::MAX_SELECTION }> = selection
            .iter()
            .enumerate()
            .filter(|(_, id)| id.class() == class)
            .map(|(i, _)| i as u8)
            .collect();
        if positions.is_empty() {
            continue;
        }
        let max = positions
            .iter()
            .flat_map(|&p| column(values, count, usize::from(p)))
            .max()
            .unwrap_or(0);
        let width = class.bit_width().max(bits_for(u32::from(max)));
        groups.push(Group { class, positions, width });
    }

    let mut out = vec![TAG_SEMANTIC, samples as u8, groups.len() as u8];
    for g in &groups {
        out.push(g.class as u8);
        out.push(g.positions.len() as u8);
        out.extend_from_slice(&g.positions);
        out.push(g.width);
    }

    let mut w = BitWriter::new();
    for g in &groups {
        let tol = g.class.tolerance();
        let rbits = residual_bits(tol);
        for &p in &g.positions {
            let col: Vec<u16> = column(values, count, usize::from(p)).collect();
            let mut start = 0;
            while start < col.len() {
                let base = col[start];
                let mut end = start + 1;
                while end < col.len()
                    && end - start < MAX_RUN
                    && col[end].abs_diff(base) <= tol
                {
                    end += 1;
                }
                let run = &col[start..end];
                let banded = run.iter().any(|&v| v != base);
                w.write(run.len() as u32, 8);
                w.write(u32::from(base), g.width);
                w.write(u32::from(banded), 1);
                if banded {
                    for &v in &run[1..] {
                        let r = i32::from(v) - i32::from(base) + i32::from(tol);
                        w.write(r as u32, rbits);
                    }
                }
                start = end;
            }
        }
    }
    out.extend_from_slice(&w.finish());
    Some(out)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<u16>> {
    let corrupt = || Fault::CompressionFailure;
    if bytes.len() < 3 || bytes[0] != TAG_SEMANTIC {
        return Err(corrupt());
    }
    let samples = usize::from(bytes[1]);
    let num_groups = usize::from(bytes[2]);
    let mut pos = 3;
    let mut groups = Vec::with_capacity(num_groups);
    let mut register_count = 0usize;
    for _ in 0..num_groups {
        let class = SemanticClass::from_type_id(*bytes.get(pos).ok_or_else(corrupt)?)
            .ok_or_else(corrupt)?;
        let n = usize::from(*bytes.get(pos + 1).ok_or_else(corrupt)?);
        let positions = bytes.get(pos + 2..pos + 2 + n).ok_or_else(corrupt)?;
        let width = *bytes.get(pos + 2 + n).ok_or_else(corrupt)?;
        if width == 0 || width > 16 {
            return Err(corrupt());
        }
        pos += 3 + n;
        register_count += n;
        groups.push((class, positions, width));
    }
    if register_count == 0 {
        return Err(corrupt());
    }

    let mut out = vec![0u16; samples * register_count];
    let mut seen = vec![false; register_count];
    let mut r = BitReader::new(&bytes[pos..]);
    for (class, positions, width) in groups {
        let tol = class.tolerance();
        let rbits = residual_bits(tol);
        for &p in positions {
            let p = usize::from(p);
            if p >= register_count || seen[p] {
                return Err(corrupt());
            }
            seen[p] = true;
            let mut row = 0;
            while row < samples {
                let run = r.read(8).ok_or_else(corrupt)? as usize;
                let base = r.read(width).ok_or_else(corrupt)?;
                let banded = r.read(1).ok_or_else(corrupt)? == 1;
                if run == 0 || row + run > samples {
                    return Err(corrupt());
                }
                out[row * register_count + p] = base as u16;
                for k in 1..run {
                    let v = if banded {
                        let res = r.read(rbits).ok_or_else(corrupt)?;
                        i64::from(base) + i64::from(res) - i64::from(tol)
                    } else {
                        i64::from(base)
                    };
                    out[(row + k) * register_count + p] =
                        u16::try_from(v).map_err(|_| corrupt())?;
                }
                row += run;
            }
        }
    }
    if seen.iter().any(|s| !s) {
        return Err(corrupt());
    }
    Ok(out)
}

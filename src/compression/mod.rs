//! Adaptive batch compression.
//!
//! Every batch is encoded by all four codecs.  Each candidate is decoded
//! again and compared with the input; the smallest verified candidate wins
//! and raw is the fallback when none verifies.  The first byte of every
//! packet is its method tag, which [`decompress`] dispatches on.

mod bitpack;
pub mod bits;
mod dictionary;
mod semantic;
mod temporal;

use core::fmt;

use log::{debug, warn};
use serde::Serialize;

use crate::app::ports::Clock;
use crate::error::{Fault, Result};
use crate::registers::RegisterSelection;

pub const TAG_RAW: u8 = 0x00;
pub const TAG_BITPACK: u8 = 0x01;
pub const TAG_SEMANTIC: u8 = 0x50;
pub const TAG_TEMPORAL_BASE: u8 = 0x70;
pub const TAG_TEMPORAL_DELTA: u8 = 0x71;
pub const TAG_DICTIONARY: u8 = 0xD0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "bit_packed")]
    BitPacked,
    #[serde(rename = "semantic_rle")]
    SemanticRle,
    #[serde(rename = "temporal_delta")]
    TemporalDelta,
    #[serde(rename = "dictionary_bitmask")]
    Dictionary,
}

impl Method {
    pub const ALL: [Self; 5] = [
        Self::Dictionary,
        Self::TemporalDelta,
        Self::SemanticRle,
        Self::BitPacked,
        Self::Raw,
    ];

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_RAW => Some(Self::Raw),
            TAG_BITPACK => Some(Self::BitPacked),
            TAG_SEMANTIC => Some(Self::SemanticRle),
            TAG_TEMPORAL_BASE | TAG_TEMPORAL_DELTA => Some(Self::TemporalDelta),
            TAG_DICTIONARY => Some(Self::Dictionary),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::BitPacked => "bit_packed",
            Self::SemanticRle => "semantic_rle",
            Self::TemporalDelta => "temporal_delta",
            Self::Dictionary => "dictionary_bitmask",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Dictionary => 0,
            Self::TemporalDelta => 1,
            Self::SemanticRle => 2,
            Self::BitPacked => 3,
            Self::Raw => 4,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decode any packet produced by [`compress`].  `register_count` is only
/// consulted by the dictionary layout, which does not carry it.
pub fn decompress(bytes: &[u8], register_count: usize) -> Result<Vec<u16>> {
    let tag = *bytes.first().ok_or(Fault::CompressionFailure)?;
    match tag {
        TAG_RAW => bitpack::decode_raw(bytes),
        TAG_BITPACK => bitpack::decode(bytes),
        TAG_SEMANTIC => semantic::decode(bytes),
        TAG_TEMPORAL_BASE => temporal::decode(bytes),
        TAG_DICTIONARY => dictionary::decode(bytes, register_count),
        // A delta frame cannot open a packet.
        _ => Err(Fault::CompressionFailure),
    }
}

/// The winning encoding of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub method: Method,
    pub lossless_verified: bool,
}

fn candidates(values: &[u16], selection: &RegisterSelection) -> [(Method, Option<Vec<u8>>); 4] {
    let packed = bitpack::encode(values);
    let packed_method = match packed.as_deref().and_then(<[u8]>::first) {
        Some(&TAG_BITPACK) => Method::BitPacked,
        _ => Method::Raw,
    };
    [
        (Method::Dictionary, dictionary::encode(values, selection.len())),
        (Method::TemporalDelta, temporal::encode(values, selection)),
        (Method::SemanticRle, semantic::encode(values, selection)),
        (packed_method, packed),
    ]
}

/// Pick the smallest losslessly decodable encoding of `values`
/// (row-major, `selection.len()` values per sample).  Ties go to the codec
/// evaluated first.
pub fn compress(values: &[u16], selection: &RegisterSelection) -> Result<Compressed> {
    if selection.is_empty() || values.len() % selection.len() != 0 {
        return Err(Fault::CompressionFailure);
    }
    let mut best: Option<(Method, Vec<u8>)> = None;
    for (method, encoded) in candidates(values, selection) {
        let Some(bytes) = encoded else { continue };
        match decompress(&bytes, selection.len()) {
            Ok(decoded) if decoded == values => {}
            _ => {
                warn!("Compression: {} failed verification, skipped", method);
                continue;
            }
        }
        if best.as_ref().is_none_or(|(_, b)| bytes.len() < b.len()) {
            best = Some((method, bytes));
        }
    }

    match best {
        Some((method, bytes)) => Ok(Compressed {
            bytes,
            method,
            lossless_verified: true,
        }),
        None => {
            let bytes = bitpack::encode_raw(values);
            let lossless_verified = decompress(&bytes, selection.len())
                .is_ok_and(|d| d == values);
            Ok(Compressed {
                bytes,
                method: Method::Raw,
                lossless_verified,
            })
        }
    }
}

/// Running totals for one method.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct MethodStats {
    pub count: u32,
    pub mean_ratio: f32,
    pub mean_time_us: f32,
}

impl MethodStats {
    fn record(&mut self, ratio: f32, time_us: u64) {
        self.count += 1;
        let n = self.count as f32;
        self.mean_ratio += (ratio - self.mean_ratio) / n;
        self.mean_time_us += (time_us as f32 - self.mean_time_us) / n;
    }
}

/// Result of [`Compressor::compress`]: the encoding plus its measurements.
#[derive(Debug, Clone)]
pub struct CompressionRecord {
    pub compressed: Compressed,
    pub original_size: usize,
    /// `compressed / original` (lower is better).
    pub ratio: f32,
    pub time_us: u64,
}

/// Compression front end that keeps per-method telemetry.
#[derive(Debug, Default)]
pub struct Compressor {
    stats: [MethodStats; 5],
    failures: u32,
}

impl Compressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compress(
        &mut self,
        values: &[u16],
        selection: &RegisterSelection,
        clock: &dyn Clock,
    ) -> Result<CompressionRecord> {
        let start = clock.now_us();
        let compressed = match compress(values, selection) {
            Ok(c) => c,
            Err(e) => {
                self.failures += 1;
                return Err(e);
            }
        };
        let time_us = clock.now_us().saturating_sub(start);
        let original_size = values.len() * 2;
        let ratio = if original_size == 0 {
            1.0
        } else {
            compressed.bytes.len() as f32 / original_size as f32
        };
        self.stats[compressed.method.index()].record(ratio, time_us);
        debug!(
            "Compression: {} {} -> {} bytes ({:.3}) in {} us",
            compressed.method,
            original_size,
            compressed.bytes.len(),
            ratio,
            time_us
        );
        Ok(CompressionRecord {
            compressed,
            original_size,
            ratio,
            time_us,
        })
    }

    pub fn method_stats(&self, method: Method) -> MethodStats {
        self.stats[method.index()]
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

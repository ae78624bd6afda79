//! Drain the ring buffer into one secured upload.
//!
//! Each upload tick drains every queued packet, renders the upload document,
//! wraps it in the security envelope and POSTs it to `<cloud>/process`.  If
//! every attempt fails the drained packets go back into the buffer in their
//! original order.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{info, warn};
use serde::Serialize;

use crate::app::ports::{HttpMethod, HttpRequest, StoragePort};
use crate::buffer::SharedRingBuffer;
use crate::compression::Method;
use crate::error::{Fault, Resource, Result};
use crate::net::{NetIo, UPLOAD_TIMEOUT_MS, backoff_ms};
use crate::pipeline::CompressedPacket;
use crate::security::{PayloadCipher, SecurityEnvelope};

const MODULE: &str = "Uploader";

/// Free heap required before the upload document is built.
pub const MIN_UPLOAD_HEAP_BYTES: u32 = 20 * 1024;

// ── Upload document ───────────────────────────────────────────

#[derive(Serialize)]
struct UploadDocument<'a> {
    device_id: &'a str,
    timestamp: u64,
    data_type: &'static str,
    total_samples: usize,
    register_mapping: BTreeMap<String, &'static str>,
    compressed_data: Vec<PacketEntry>,
    session_summary: SessionSummary,
}

#[derive(Serialize)]
struct PacketEntry {
    compressed_binary: String,
    decompression_metadata: DecompressionMetadata,
    performance_metrics: PerformanceMetrics,
}

#[derive(Serialize)]
struct DecompressionMetadata {
    method: Method,
    register_count: usize,
    original_size_bytes: usize,
    compressed_size_bytes: usize,
    timestamp: u64,
    register_layout: Vec<u8>,
    sample_count: usize,
}

#[derive(Serialize)]
struct PerformanceMetrics {
    academic_ratio: f32,
    traditional_ratio: f32,
    compression_time_us: u64,
    savings_percent: f32,
    lossless_verified: bool,
}

#[derive(Serialize)]
struct SessionSummary {
    packet_count: usize,
    total_original_bytes: usize,
    total_compressed_bytes: usize,
    overall_academic_ratio: f32,
    overall_traditional_ratio: f32,
    overall_savings_percent: f32,
}

fn ratios(original: usize, compressed: usize) -> (f32, f32, f32) {
    if original == 0 || compressed == 0 {
        return (1.0, 1.0, 0.0);
    }
    let academic = compressed as f32 / original as f32;
    (academic, original as f32 / compressed as f32, (1.0 - academic) * 100.0)
}

fn entry(packet: &CompressedPacket) -> PacketEntry {
    let (academic, traditional, savings) = ratios(packet.original_size, packet.bytes.len());
    PacketEntry {
        compressed_binary: STANDARD.encode(&packet.bytes),
        decompression_metadata: DecompressionMetadata {
            method: packet.method,
            register_count: packet.register_layout.len(),
            original_size_bytes: packet.original_size,
            compressed_size_bytes: packet.bytes.len(),
            timestamp: packet.timestamp_ms,
            register_layout: packet.register_layout.iter().map(|id| id as u8).collect(),
            sample_count: packet.sample_count,
        },
        performance_metrics: PerformanceMetrics {
            academic_ratio: academic,
            traditional_ratio: traditional,
            compression_time_us: packet.compression_time_us,
            savings_percent: savings,
            lossless_verified: packet.lossless_verified,
        },
    }
}

/// Render the upload JSON for `packets`.
pub fn build_document(device_id: &str, timestamp: u64, packets: &[CompressedPacket]) -> Result<Vec<u8>> {
    let register_mapping: BTreeMap<String, &'static str> = packets
        .first()
        .map(|p| {
            p.register_layout
                .iter()
                .enumerate()
                .map(|(i, id)| (i.to_string(), id.name()))
                .collect()
        })
        .unwrap_or_default();
    let total_original: usize = packets.iter().map(|p| p.original_size).sum();
    let total_compressed: usize = packets.iter().map(|p| p.bytes.len()).sum();
    let (academic, traditional, savings) = ratios(total_original, total_compressed);

    let doc = UploadDocument {
        device_id,
        timestamp,
        data_type: "compressed_sensor_batch",
        total_samples: packets.iter().map(|p| p.sample_count).sum(),
        register_mapping,
        compressed_data: packets.iter().map(entry).collect(),
        session_summary: SessionSummary {
            packet_count: packets.len(),
            total_original_bytes: total_original,
            total_compressed_bytes: total_compressed,
            overall_academic_ratio: academic,
            overall_traditional_ratio: traditional,
            overall_savings_percent: savings,
        },
    };
    serde_json::to_vec(&doc).map_err(|_| Fault::UploadFailure)
}

// ── Uploader ──────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub bytes_sent: u64,
    pub last_failure_ms: Option<u64>,
    /// Retries spent in the cycle in progress; cleared on success.
    pub current_retry: u8,
    pub restored_packets: u32,
    pub skipped_low_heap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    Empty,
    LowHeap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Skipped(SkipReason),
    Delivered { packets: usize, bytes: usize },
    /// Every attempt failed; `queued` is the buffer occupancy afterwards.
    Restored { packets: usize, queued: usize },
}

/// Inputs of one upload cycle besides the network.
pub struct UploadContext<'a, C: PayloadCipher> {
    pub storage: &'a mut dyn StoragePort,
    pub envelope: &'a mut SecurityEnvelope<C>,
    pub buffer: &'a SharedRingBuffer<CompressedPacket>,
    pub connected: bool,
    pub free_heap: u32,
}

pub struct Uploader {
    url: String,
    device_id: String,
    max_attempts: u8,
    encrypt: bool,
    stats: UploadStats,
}

impl Uploader {
    /// `max_attempts` is clamped to 1..=3.
    pub fn new(cloud_url: &str, device_id: &str, max_attempts: u8) -> Self {
        Self {
            url: format!("{}/process", cloud_url.trim_end_matches('/')),
            device_id: device_id.to_string(),
            max_attempts: max_attempts.clamp(1, 3),
            encrypt: false,
            stats: UploadStats::default(),
        }
    }

    /// Encrypt payloads with the envelope cipher before the MAC.
    pub fn set_encrypted(&mut self, encrypt: bool) {
        self.encrypt = encrypt;
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    /// Run one upload cycle.
    pub fn upload<C: PayloadCipher>(
        &mut self,
        net: &mut NetIo<'_>,
        ctx: &mut UploadContext<'_, C>,
    ) -> Result<UploadOutcome> {
        if !ctx.connected {
            return Ok(UploadOutcome::Skipped(SkipReason::Offline));
        }
        if ctx.buffer.is_empty() {
            return Ok(UploadOutcome::Skipped(SkipReason::Empty));
        }
        if ctx.free_heap < MIN_UPLOAD_HEAP_BYTES {
            self.stats.skipped_low_heap += 1;
            warn!(
                "{}: {} B free heap, need {} B; upload deferred",
                MODULE, ctx.free_heap, MIN_UPLOAD_HEAP_BYTES
            );
            return Ok(UploadOutcome::Skipped(SkipReason::LowHeap));
        }

        let packets = ctx.buffer.drain_all();
        let timestamp = net
            .clock
            .unix_time()
            .map_or_else(|| net.clock.now_ms(), |s| s * 1000);
        let document = match build_document(&self.device_id, timestamp, &packets) {
            Ok(d) => d,
            Err(fault) => return Err(self.give_back(ctx.buffer, packets, fault)),
        };

        let mut last_fault = Fault::UploadFailure;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                self.stats.current_retry = attempt;
                net.clock.sleep_ms(backoff_ms(attempt - 1));
            }
            // A fresh nonce per attempt; the cloud rejects replays.
            let secured = match ctx.envelope.secure(ctx.storage, &document, self.encrypt) {
                Ok(s) => s,
                Err(fault) => return Err(self.give_back(ctx.buffer, packets, fault)),
            };
            self.stats.attempts += 1;
            self.stats.bytes_sent += secured.len() as u64;

            let request = HttpRequest {
                method: HttpMethod::Post,
                url: &self.url,
                headers: &[("Content-Type", "application/json")],
                body: secured.as_bytes(),
                timeout_ms: UPLOAD_TIMEOUT_MS,
            };
            match net.send_once(&request) {
                Ok(_) => {
                    self.stats.successes += 1;
                    self.stats.current_retry = 0;
                    if attempt > 0 {
                        let now = net.clock.now_ms();
                        net.faults
                            .log_fault(now, last_fault, "upload", MODULE, true, "upload_retry", attempt);
                        net.faults.report_latest(&mut *net.http);
                    }
                    info!(
                        "{}: {} packets delivered ({} B secured)",
                        MODULE,
                        packets.len(),
                        secured.len()
                    );
                    return Ok(UploadOutcome::Delivered {
                        packets: packets.len(),
                        bytes: secured.len(),
                    });
                }
                Err(fault) => {
                    self.stats.last_failure_ms = Some(net.clock.now_ms());
                    warn!("{}: attempt {} failed ({})", MODULE, attempt + 1, fault);
                    last_fault = fault;
                    if fault.is_configuration_error() {
                        break;
                    }
                }
            }
        }

        self.stats.failures += 1;
        let now = net.clock.now_ms();
        net.faults.log_fault(
            now,
            last_fault,
            "upload failed, packets restored",
            MODULE,
            false,
            "restore_buffer",
            self.stats.current_retry,
        );
        if self.stats.current_retry > 0 {
            net.faults.report_latest(&mut *net.http);
        }
        self.stats.current_retry = 0;
        let count = packets.len();
        self.restore(ctx.buffer, packets);
        Ok(UploadOutcome::Restored {
            packets: count,
            queued: ctx.buffer.size(),
        })
    }

    fn restore(&mut self, buffer: &SharedRingBuffer<CompressedPacket>, packets: Vec<CompressedPacket>) {
        let count = packets.len();
        buffer.restore(packets);
        self.stats.restored_packets += count as u32;
        warn!("{}: {} packets restored ({} queued)", MODULE, count, buffer.size());
    }

    fn give_back(
        &mut self,
        buffer: &SharedRingBuffer<CompressedPacket>,
        packets: Vec<CompressedPacket>,
        fault: Fault,
    ) -> Fault {
        self.stats.failures += 1;
        self.restore(buffer, packets);
        match fault {
            Fault::SecurityKeyMissing => fault,
            Fault::ResourceExhausted(_) => Fault::ResourceExhausted(Resource::Heap),
            _ => Fault::UploadFailure,
        }
    }
}

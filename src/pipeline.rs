//! Acquisition → batch → compression → ring buffer.

use log::{info, warn};

use crate::acquisition::Sample;
use crate::app::ports::Clock;
use crate::buffer::SharedRingBuffer;
use crate::compression::{Compressor, Method};
use crate::error::{Fault, Result};
use crate::registers::RegisterSelection;

pub const SAMPLES_PER_BATCH: usize = 5;

/// One compressed batch waiting for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedPacket {
    pub bytes: Vec<u8>,
    pub method: Method,
    pub register_layout: RegisterSelection,
    pub sample_count: usize,
    pub original_size: usize,
    /// Poll time of the last sample in the batch.
    pub timestamp_ms: u64,
    pub compression_time_us: u64,
    /// `compressed / original`.
    pub compression_ratio: f32,
    pub lossless_verified: bool,
}

/// What happened to a completed batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedBatch {
    pub method: Method,
    pub original_size: usize,
    pub compressed_size: usize,
    /// Buffer occupancy after the push.
    pub queued: usize,
    /// The push overwrote the oldest packet.
    pub evicted: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub samples: u32,
    pub dropped_samples: u32,
    pub discarded_batches: u32,
    pub batches: u32,
    pub compression_failures: u32,
    pub overwritten_packets: u32,
}

pub struct Pipeline {
    batch_size: usize,
    selection: Option<RegisterSelection>,
    values: Vec<u16>,
    samples_in_batch: usize,
    last_timestamp_ms: u64,
    compressor: Compressor,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            selection: None,
            values: Vec::new(),
            samples_in_batch: 0,
            last_timestamp_ms: 0,
            compressor: Compressor::new(),
            stats: PipelineStats::default(),
        }
    }

    /// Add a sample; compress and enqueue when the batch is full.
    ///
    /// Returns `Ok(None)` while the batch is still filling.  A compression
    /// failure drops the batch and is returned as the error.
    pub fn on_sample(
        &mut self,
        sample: Sample,
        clock: &dyn Clock,
        buffer: &SharedRingBuffer<CompressedPacket>,
    ) -> Result<Option<QueuedBatch>> {
        self.stats.samples += 1;
        info!(
            "Pipeline: sample t={} [{}]",
            sample.timestamp_ms,
            sample
                .pairs()
                .map(|(id, v)| format!("{}={}", id.name(), v))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if self.selection.as_ref().is_some_and(|s| *s != sample.selection) {
            warn!(
                "Pipeline: selection changed, discarding {} buffered samples",
                self.samples_in_batch
            );
            self.discard_batch();
        }
        if self.selection.is_none() {
            self.selection = Some(sample.selection.clone());
        }
        self.values.extend_from_slice(&sample.values);
        self.samples_in_batch += 1;
        self.last_timestamp_ms = sample.timestamp_ms;

        if self.samples_in_batch < self.batch_size {
            return Ok(None);
        }
        self.flush(clock, buffer).map(Some)
    }

    /// Count a poll that produced no sample.
    pub fn on_dropped_sample(&mut self) {
        self.stats.dropped_samples += 1;
    }

    pub fn discard_batch(&mut self) {
        if self.samples_in_batch > 0 {
            self.stats.discarded_batches += 1;
        }
        self.values.clear();
        self.samples_in_batch = 0;
        self.selection = None;
    }

    fn flush(
        &mut self,
        clock: &dyn Clock,
        buffer: &SharedRingBuffer<CompressedPacket>,
    ) -> Result<QueuedBatch> {
        let Some(selection) = self.selection.take() else {
            return Err(Fault::CompressionFailure);
        };
        let values = core::mem::take(&mut self.values);
        let sample_count = core::mem::replace(&mut self.samples_in_batch, 0);

        let record = match self.compressor.compress(&values, &selection, clock) {
            Ok(r) => r,
            Err(fault) => {
                self.stats.compression_failures += 1;
                warn!("Pipeline: compression failed ({}), batch dropped", fault);
                return Err(fault);
            }
        };

        let packet = CompressedPacket {
            method: record.compressed.method,
            lossless_verified: record.compressed.lossless_verified,
            register_layout: selection,
            sample_count,
            original_size: record.original_size,
            timestamp_ms: self.last_timestamp_ms,
            compression_time_us: record.time_us,
            compression_ratio: record.ratio,
            bytes: record.compressed.bytes,
        };
        let summary = QueuedBatch {
            method: packet.method,
            original_size: packet.original_size,
            compressed_size: packet.bytes.len(),
            queued: 0,
            evicted: false,
        };
        let evicted = buffer.push(packet).is_some();
        if evicted {
            self.stats.overwritten_packets += 1;
            warn!("Pipeline: ring buffer full, oldest packet overwritten");
        }
        self.stats.batches += 1;
        Ok(QueuedBatch {
            queued: buffer.size(),
            evicted,
            ..summary
        })
    }

    pub fn batch_len(&self) -> usize {
        self.samples_in_batch
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterId;

    struct Fixed;
    impl Clock for Fixed {
        fn now_us(&self) -> u64 {
            0
        }
        fn sleep_ms(&self, _: u64) {}
    }

    fn sample(t: u64, sel: &RegisterSelection, base: u16) -> Sample {
        Sample {
            timestamp_ms: t,
            selection: sel.clone(),
            values: (0..sel.len() as u16).map(|i| base + i).collect(),
        }
    }

    #[test]
    fn fifth_sample_closes_the_batch() {
        let sel = RegisterSelection::all();
        let buffer = SharedRingBuffer::new(4);
        let mut p = Pipeline::new(SAMPLES_PER_BATCH);
        for t in 0..4 {
            assert_eq!(p.on_sample(sample(t, &sel, 100), &Fixed, &buffer), Ok(None));
        }
        let queued = p.on_sample(sample(4, &sel, 100), &Fixed, &buffer).unwrap().unwrap();
        assert_eq!(queued.original_size, 100);
        assert_eq!(queued.queued, 1);
        assert_eq!(p.batch_len(), 0);
        let packets = buffer.drain_all();
        assert_eq!(packets[0].sample_count, 5);
        assert_eq!(packets[0].timestamp_ms, 4);
        assert!(packets[0].lossless_verified);
    }

    #[test]
    fn selection_change_discards_partial_batch() {
        let all = RegisterSelection::all();
        let one = RegisterSelection::new(&[RegisterId::Pac]).unwrap();
        let buffer = SharedRingBuffer::new(4);
        let mut p = Pipeline::new(SAMPLES_PER_BATCH);
        p.on_sample(sample(0, &all, 1), &Fixed, &buffer).unwrap();
        p.on_sample(sample(1, &all, 1), &Fixed, &buffer).unwrap();
        p.on_sample(sample(2, &one, 1), &Fixed, &buffer).unwrap();
        assert_eq!(p.batch_len(), 1);
        assert_eq!(p.stats().discarded_batches, 1);
    }

    #[test]
    fn full_buffer_reports_eviction() {
        let sel = RegisterSelection::new(&[RegisterId::Vac1]).unwrap();
        let buffer = SharedRingBuffer::new(1);
        let mut p = Pipeline::new(1);
        let first = p.on_sample(sample(0, &sel, 5), &Fixed, &buffer).unwrap().unwrap();
        assert!(!first.evicted);
        let second = p.on_sample(sample(1, &sel, 6), &Fixed, &buffer).unwrap().unwrap();
        assert!(second.evicted);
        assert_eq!(p.stats().overwritten_packets, 1);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the current run of one pipeline, reset by `start`. Updated
/// by producers and the worker, read at any time through
/// [`PipelineStats::snapshot`].
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    packets: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
///
/// On the encode side `submitted` counts frames accepted into the queue,
/// `processed` frames passed to the engine and `packets`/`bytes` the output.
/// On the decode side `packets`/`bytes` count chunks read and `processed`
/// frames decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub processed: u64,
    pub skipped: u64,
    pub packets: u64,
    pub bytes: u64,
    pub errors: u64,
}

impl PipelineStats {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// One packet emitted (encode) or one chunk read (decode).
    pub fn record_packet(&self, bytes: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter; done on each `start` so snapshots describe one run.
    pub fn reset(&self) {
        for counter in [
            &self.submitted,
            &self.processed,
            &self.skipped,
            &self.packets,
            &self.bytes,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

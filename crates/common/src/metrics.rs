/*
 * Copy progress counters.
 *
 * Shared between the scan producer and the write consumer and
 * summarized by the orchestrator when the job ends.
 */

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Capacity units are fractional; counters store thousandths.
const UNIT_SCALE: f64 = 1000.0;

#[derive(Debug, Default)]
pub struct CopyMetrics {
    // Scan side
    pub segments_started: AtomicU64,
    pub segments_completed: AtomicU64,
    pub segments_failed: AtomicU64,
    pub pages_scanned: AtomicU64,
    pub items_read: AtomicU64,
    read_capacity_milli: AtomicU64,

    // Write side
    pub batches_written: AtomicU64,
    pub items_written: AtomicU64,
    pub unprocessed_retries: AtomicU64,
    write_capacity_milli: AtomicU64,
}

impl CopyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_segment_start(&self) {
        self.segments_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_complete(&self, success: bool) {
        if success {
            self.segments_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.segments_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records one scanned page and the read capacity it consumed.
    pub fn record_page(&self, items: u64, capacity_units: f64) {
        self.pages_scanned.fetch_add(1, Ordering::Relaxed);
        self.items_read.fetch_add(items, Ordering::Relaxed);
        self.read_capacity_milli
            .fetch_add(to_milli(capacity_units), Ordering::Relaxed);
    }

    /// Records one batch write request.
    pub fn record_batch(&self, items: u64, capacity_units: f64) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.items_written.fetch_add(items, Ordering::Relaxed);
        self.write_capacity_milli
            .fetch_add(to_milli(capacity_units), Ordering::Relaxed);
    }

    pub fn record_unprocessed_retry(&self) {
        self.unprocessed_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            segments_started: self.segments_started.load(Ordering::Relaxed),
            segments_completed: self.segments_completed.load(Ordering::Relaxed),
            segments_failed: self.segments_failed.load(Ordering::Relaxed),
            pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
            items_read: self.items_read.load(Ordering::Relaxed),
            read_capacity_units: from_milli(self.read_capacity_milli.load(Ordering::Relaxed)),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            items_written: self.items_written.load(Ordering::Relaxed),
            unprocessed_retries: self.unprocessed_retries.load(Ordering::Relaxed),
            write_capacity_units: from_milli(self.write_capacity_milli.load(Ordering::Relaxed)),
        }
    }
}

fn to_milli(units: f64) -> u64 {
    if units.is_finite() && units > 0.0 {
        (units * UNIT_SCALE).round() as u64
    } else {
        0
    }
}

fn from_milli(milli: u64) -> f64 {
    milli as f64 / UNIT_SCALE
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub segments_started: u64,
    pub segments_completed: u64,
    pub segments_failed: u64,
    pub pages_scanned: u64,
    pub items_read: u64,
    pub read_capacity_units: f64,
    pub batches_written: u64,
    pub items_written: u64,
    pub unprocessed_retries: u64,
    pub write_capacity_units: f64,
}

impl MetricsSnapshot {
    /// Items written per second over the given wall time.
    pub fn write_rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.items_written as f64 / secs
        }
    }

    /// Items scanned but not (yet) written.
    pub fn items_pending(&self) -> u64 {
        self.items_read.saturating_sub(self.items_written)
    }
}

/// Tracing span names for consistent instrumentation.
pub mod spans {
    pub const COPY_JOB: &str = "copy_job";
    pub const SCAN_SEGMENT: &str = "scan_segment";
    pub const WRITE_BATCH: &str = "write_batch";
}

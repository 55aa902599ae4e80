//! Metrics and observability for meilisync-pg.
//!
//! Counters are kept in-process for the run summary and mirrored to the
//! `metrics` facade, which is a no-op unless the host installs a recorder.

use crate::error::Error;
use crate::orchestrator::IndexSyncResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for sync runs.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Indexes synced successfully
    pub indexes_synced: AtomicU64,
    /// Indexes that failed
    pub indexes_failed: AtomicU64,
    /// Indexes skipped by `--only`
    pub indexes_skipped: AtomicU64,
    /// Documents extracted from PostgreSQL
    pub documents_extracted: AtomicU64,
    /// Batches extracted
    pub batches: AtomicU64,
    /// Batches the sink did not accept
    pub batches_failed: AtomicU64,
    /// Total index sync duration in milliseconds
    pub sync_duration_ms: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful index run.
    pub fn record_synced(&self, result: &IndexSyncResult) {
        self.indexes_synced.fetch_add(1, Ordering::Relaxed);
        self.documents_extracted
            .fetch_add(result.total as u64, Ordering::Relaxed);
        self.batches.fetch_add(result.batches as u64, Ordering::Relaxed);
        self.batches_failed
            .fetch_add(result.failed_batches as u64, Ordering::Relaxed);
        self.sync_duration_ms
            .fetch_add(result.duration_ms, Ordering::Relaxed);

        let index = result.index.clone();
        metrics::counter!("meilisync_indexes_synced_total", "index" => index.clone()).increment(1);
        metrics::counter!("meilisync_documents_extracted_total", "index" => index.clone())
            .increment(result.total as u64);
        metrics::histogram!("meilisync_index_sync_seconds", "index" => index)
            .record(result.duration_ms as f64 / 1000.0);
    }

    /// Record a failed index run.
    pub fn record_failed(&self, index: &str, error: &Error) {
        self.indexes_failed.fetch_add(1, Ordering::Relaxed);
        let partial = error.records_synced().unwrap_or(0) as u64;
        self.documents_extracted.fetch_add(partial, Ordering::Relaxed);

        metrics::counter!(
            "meilisync_indexes_failed_total",
            "index" => index.to_string(),
            "code" => error.code()
        )
        .increment(1);
    }

    /// Record an index left out of the run.
    pub fn record_skipped(&self, index: &str) {
        self.indexes_skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("meilisync_indexes_skipped_total", "index" => index.to_string())
            .increment(1);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            indexes_synced: self.indexes_synced.load(Ordering::Relaxed),
            indexes_failed: self.indexes_failed.load(Ordering::Relaxed),
            indexes_skipped: self.indexes_skipped.load(Ordering::Relaxed),
            documents_extracted: self.documents_extracted.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            sync_duration_ms: self.sync_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Indexes synced successfully
    pub indexes_synced: u64,
    /// Indexes that failed
    pub indexes_failed: u64,
    /// Indexes skipped
    pub indexes_skipped: u64,
    /// Documents extracted
    pub documents_extracted: u64,
    /// Batches extracted
    pub batches: u64,
    /// Batches the sink did not accept
    pub batches_failed: u64,
    /// Total index sync duration in milliseconds
    pub sync_duration_ms: u64,
}

impl MetricsSnapshot {
    /// Share of batches the sink accepted.
    pub fn batch_success_rate(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            (self.batches - self.batches_failed) as f64 / self.batches as f64
        }
    }

    /// Calculate documents per second.
    pub fn documents_per_second(&self) -> f64 {
        if self.sync_duration_ms == 0 {
            0.0
        } else {
            (self.documents_extracted as f64 * 1000.0) / self.sync_duration_ms as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(index: &str, total: usize, batches: usize, failed: usize) -> IndexSyncResult {
        let now = Utc::now();
        IndexSyncResult {
            index: index.into(),
            total,
            batches,
            failed_batches: failed,
            started_at: now,
            completed_at: now,
            duration_ms: 500,
        }
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_synced(&result("users", 100, 10, 1));
        metrics.record_synced(&result("products", 50, 5, 0));
        let inner = Error::config("query failed");
        metrics.record_failed("orders", &Error::extraction("orders", 20, inner));
        metrics.record_skipped("tags");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.indexes_synced, 2);
        assert_eq!(snapshot.indexes_failed, 1);
        assert_eq!(snapshot.indexes_skipped, 1);
        assert_eq!(snapshot.documents_extracted, 170);
        assert_eq!(snapshot.batches, 15);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.sync_duration_ms, 1000);
    }

    #[test]
    fn test_metrics_calculations() {
        let snapshot = MetricsSnapshot {
            indexes_synced: 3,
            indexes_failed: 1,
            indexes_skipped: 2,
            documents_extracted: 1000,
            batches: 10,
            batches_failed: 2,
            sync_duration_ms: 5000,
        };

        assert!((snapshot.batch_success_rate() - 0.8).abs() < 0.001);
        assert!((snapshot.documents_per_second() - 200.0).abs() < 0.001);

        let empty = Metrics::new().snapshot();
        assert_eq!(empty.batch_success_rate(), 0.0);
        assert_eq!(empty.documents_per_second(), 0.0);
    }
}

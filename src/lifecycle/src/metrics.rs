//! Lifecycle Metrics
//!
//! Thread-safe counters accumulated across sweeps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe metrics for tracking lifecycle operations
#[derive(Debug, Clone)]
pub struct LifecycleMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Number of sweeps started
    sweeps_started: AtomicUsize,
    /// Number of sweeps aborted, by a listing failure or a propagated
    /// compression failure
    sweeps_failed: AtomicUsize,
    /// Artifacts archived
    artifacts_compressed: AtomicUsize,
    /// Raw artifacts deleted
    artifacts_deleted: AtomicUsize,
    /// Compression or deletion failures
    failures: AtomicUsize,
    /// Total bytes of archives written
    archive_bytes_written: AtomicU64,
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                sweeps_started: AtomicUsize::new(0),
                sweeps_failed: AtomicUsize::new(0),
                artifacts_compressed: AtomicUsize::new(0),
                artifacts_deleted: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
                archive_bytes_written: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_sweep_started(&self) {
        self.inner.sweeps_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_failed(&self) {
        self.inner.sweeps_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression(&self, archive_bytes: u64) {
        self.inner
            .artifacts_compressed
            .fetch_add(1, Ordering::Relaxed);
        self.inner
            .archive_bytes_written
            .fetch_add(archive_bytes, Ordering::Relaxed);
    }

    pub fn record_deletion(&self) {
        self.inner.artifacts_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sweeps_started(&self) -> usize {
        self.inner.sweeps_started.load(Ordering::Relaxed)
    }

    pub fn sweeps_failed(&self) -> usize {
        self.inner.sweeps_failed.load(Ordering::Relaxed)
    }

    pub fn artifacts_compressed(&self) -> usize {
        self.inner.artifacts_compressed.load(Ordering::Relaxed)
    }

    pub fn artifacts_deleted(&self) -> usize {
        self.inner.artifacts_deleted.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.inner.failures.load(Ordering::Relaxed)
    }

    pub fn archive_bytes_written(&self) -> u64 {
        self.inner.archive_bytes_written.load(Ordering::Relaxed)
    }

    /// Log a one-line summary of the counters
    pub fn log_summary(&self) {
        tracing::info!(
            sweeps_started = self.sweeps_started(),
            sweeps_failed = self.sweeps_failed(),
            artifacts_compressed = self.artifacts_compressed(),
            artifacts_deleted = self.artifacts_deleted(),
            failures = self.failures(),
            archive_bytes_written = self.archive_bytes_written(),
            "Lifecycle metrics"
        );
    }
}

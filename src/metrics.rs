use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters maintained by the command worker.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    submitted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    total_task_micros: AtomicU64,
    max_task_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
    pub published: u64,
    pub publish_failures: u64,
    #[serde(with = "crate::config::duration_ms")]
    pub mean_task_time: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub max_task_time: Duration,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a queued command that left the queue without running.
    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finished(&self, succeeded: bool, elapsed: Duration) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_task_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_task_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self, published: usize, failed: usize) {
        self.published.fetch_add(published as u64, Ordering::Relaxed);
        self.publish_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let finished = completed + failed;
        let total = self.total_task_micros.load(Ordering::Relaxed);
        let mean = if finished == 0 { 0 } else { total / finished };
        let submitted = self.submitted.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        // approximate while commands are in flight
        let pending = submitted.saturating_sub(finished + dropped);
        MetricsSnapshot {
            submitted,
            rejected: self.rejected.load(Ordering::Relaxed),
            pending: usize::try_from(pending).unwrap_or(usize::MAX),
            completed,
            failed,
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            mean_task_time: Duration::from_micros(mean),
            max_task_time: Duration::from_micros(self.max_task_micros.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_latency() {
        let metrics = GatewayMetrics::new();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_finished(true, Duration::from_millis(2));
        metrics.record_finished(false, Duration::from_millis(4));
        metrics.record_dropped();
        metrics.record_rejected();
        metrics.record_published(3, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 3);
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.published, 3);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.mean_task_time, Duration::from_millis(3));
        assert_eq!(snapshot.max_task_time, Duration::from_millis(4));
    }
}

use crate::metrics::snapshot::MetricsSnapshot;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Live progress counters for one run.
///
/// Only used for reporting progress; the run summary is computed from the
/// result sink, not from these.
#[derive(Clone)]
pub struct MetricsCollector {
    dispatched: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
    abandoned: Arc<AtomicU64>,
    total_latency_ms: Arc<AtomicU64>,
    start_time: Arc<Instant>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            dispatched: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            abandoned: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            start_time: Arc::new(Instant::now()),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_skipped(&self, count: u64) {
        self.skipped.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::SeqCst);
    }

    pub fn increment_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_success(&self, latency: Duration) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::SeqCst);
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let total_latency = self.total_latency_ms.load(Ordering::SeqCst);

        let success_rate = if completed > 0 {
            (succeeded as f64 / completed as f64) * 100.0
        } else {
            0.0
        };

        let avg_latency_ms = if succeeded > 0 {
            total_latency / succeeded
        } else {
            0
        };

        let elapsed = self.start_time.elapsed().as_secs_f64();

        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            completed,
            succeeded,
            failed: self.failed.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
            success_rate,
            avg_latency_ms,
            requests_per_minute: if elapsed > 0.0 {
                succeeded as f64 / elapsed * 60.0
            } else {
                0.0
            },
            elapsed_seconds: elapsed,
        }
    }

    /// Publishes a fresh snapshot every `period` until every receiver is gone.
    pub fn watch(&self, period: Duration) -> watch::Receiver<MetricsSnapshot> {
        let (tx, rx) = watch::channel(self.snapshot());
        let metrics = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if tx.send(metrics.snapshot()).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_rates_from_counters() {
        let metrics = MetricsCollector::new();
        metrics.increment_dispatched();
        metrics.increment_dispatched();
        metrics.increment_dispatched();
        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(300));
        metrics.record_failure();
        metrics.add_skipped(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dispatched, 3);
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.skipped, 2);
        assert_eq!(snapshot.avg_latency_ms, 200);
        assert!((snapshot.success_rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn empty_snapshot_has_no_rates() {
        let snapshot = MetricsCollector::new().snapshot();
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.avg_latency_ms, 0);
    }
}

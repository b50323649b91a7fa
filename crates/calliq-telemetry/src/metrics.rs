//! In-memory pipeline metrics.
//!
//! Plain atomics, no exporter: embedders read a [`MetricsSnapshot`] and ship
//! it wherever they like. All methods take `&self` so a single instance can
//! be shared behind an `Arc` across workers.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use serde::Serialize;

/// Monotonic counter.
#[derive(Debug, Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self) {
        let _ = self.value.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge that can move in both directions.
#[derive(Debug, Default)]
struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    fn add(&self, delta: i64) {
        let _ = self.value.fetch_add(delta, Ordering::Relaxed);
    }

    fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters and gauges for one pipeline instance.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    files_done: Counter,
    files_degraded: Counter,
    files_failed: Counter,
    stage_retries: Counter,
    events_dropped: Counter,
    active_workers: Gauge,
    queue_depth: Gauge,
}

impl PipelineMetrics {
    /// Fresh instance with everything at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A file reached `done`.
    pub fn record_done(&self) {
        self.files_done.increment();
    }

    /// A file reached `degraded`.
    pub fn record_degraded(&self) {
        self.files_degraded.increment();
    }

    /// A file reached `failed`.
    pub fn record_failed(&self) {
        self.files_failed.increment();
    }

    /// A stage attempt was retried.
    pub fn record_retry(&self) {
        self.stage_retries.increment();
    }

    /// A progress event was dropped because a subscriber lagged.
    pub fn record_dropped_event(&self) {
        self.events_dropped.increment();
    }

    /// A worker picked up a file.
    pub fn worker_started(&self) {
        self.active_workers.add(1);
    }

    /// A worker released its file.
    pub fn worker_finished(&self) {
        self.active_workers.add(-1);
    }

    /// Refresh the queued-file count from the store.
    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.set(depth);
    }

    /// Point-in-time copy of every metric.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            files_done: self.files_done.get(),
            files_degraded: self.files_degraded.get(),
            files_failed: self.files_failed.get(),
            stage_retries: self.stage_retries.get(),
            events_dropped: self.events_dropped.get(),
            active_workers: self.active_workers.get(),
            queue_depth: self.queue_depth.get(),
        }
    }
}

/// Serializable point-in-time metric values.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// When the snapshot was taken (UTC, second precision).
    pub timestamp: String,
    /// Files that completed with a full analysis.
    pub files_done: u64,
    /// Files that completed without an analysis.
    pub files_degraded: u64,
    /// Files that failed terminally.
    pub files_failed: u64,
    /// Stage attempts that were retried.
    pub stage_retries: u64,
    /// Events dropped on lagging subscribers.
    pub events_dropped: u64,
    /// Workers currently processing a file.
    pub active_workers: i64,
    /// Files currently waiting for a lease.
    pub queue_depth: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_done();
        metrics.record_done();
        metrics.record_degraded();
        metrics.record_retry();

        let snap = metrics.snapshot();
        assert_eq!(snap.files_done, 2);
        assert_eq!(snap.files_degraded, 1);
        assert_eq!(snap.files_failed, 0);
        assert_eq!(snap.stage_retries, 1);
    }

    #[test]
    fn worker_gauge_moves_both_ways() {
        let metrics = PipelineMetrics::new();
        metrics.worker_started();
        metrics.worker_started();
        assert_eq!(metrics.snapshot().active_workers, 2);
        metrics.worker_finished();
        assert_eq!(metrics.snapshot().active_workers, 1);
    }

    #[test]
    fn queue_depth_is_set_not_accumulated() {
        let metrics = PipelineMetrics::new();
        metrics.set_queue_depth(7);
        metrics.set_queue_depth(3);
        assert_eq!(metrics.snapshot().queue_depth, 3);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let metrics = PipelineMetrics::new();
        metrics.record_failed();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["filesFailed"], 1);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn shared_across_threads() {
        use std::sync::Arc;

        let metrics = Arc::new(PipelineMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_retry();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().stage_retries, 800);
    }
}

//! Request counters and read-only metric snapshots.
//!
//! All counters reported together in a snapshot live behind a single mutex so
//! that a snapshot is internally consistent.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Consolidated request counters shared by the pipeline and its stages.
pub struct Metrics {
    started_at: Instant,
    counters: Mutex<Counters>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    total: u64,
    allowed: u64,
    blocked: u64,
    errors: u64,
}

/// A point-in-time, read-only view of a [`Metrics`] object.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    /// Fraction of total requests that were allowed (0.0 when no traffic)
    pub allowed_rate: f64,
    /// Fraction of total requests that were blocked (0.0 when no traffic)
    pub blocked_rate: f64,
    pub error_count: u64,
    /// Limiters or other per-key state reclaimed since startup
    pub reset_count: u64,
    /// Number of live per-key limiters (0 for components without a registry)
    pub active_limiters: usize,
    /// Seconds since the owning component was created
    pub uptime_secs: f64,
}

impl Metrics {
    /// Create a fresh metrics object; uptime starts now.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Record one request entering the owning component.
    pub fn record_request(&self) {
        self.counters.lock().total += 1;
    }

    /// Record an admitted request.
    pub fn record_allowed(&self) {
        self.counters.lock().allowed += 1;
    }

    /// Record a rejected request.
    pub fn record_blocked(&self) {
        self.counters.lock().blocked += 1;
    }

    /// Record an error propagated out of the owning component.
    pub fn record_error(&self) {
        self.counters.lock().errors += 1;
    }

    /// Time elapsed since this metrics object was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Take a consistent snapshot of all counters.
    ///
    /// `active_limiters` and `reset_count` are supplied by the caller since
    /// only registry-backed components track live per-key state and its
    /// eviction; other components pass zero.
    pub fn snapshot(&self, active_limiters: usize, reset_count: u64) -> MetricsSnapshot {
        let counters = *self.counters.lock();
        let total = counters.total;

        let rate = |part: u64| {
            if total == 0 {
                0.0
            } else {
                part as f64 / total as f64
            }
        };

        MetricsSnapshot {
            total_requests: total,
            allowed_requests: counters.allowed,
            blocked_requests: counters.blocked,
            allowed_rate: rate(counters.allowed),
            blocked_rate: rate(counters.blocked),
            error_count: counters.errors,
            reset_count,
            active_limiters,
            uptime_secs: self.uptime().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    /// Render the snapshot as a string-keyed JSON map for external exporters.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_has_zero_rates() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot(0, 0);

        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.allowed_rate, 0.0);
        assert_eq!(snapshot.blocked_rate, 0.0);
    }

    #[test]
    fn test_rates_reflect_counters() {
        let metrics = Metrics::new();
        for _ in 0..4 {
            metrics.record_request();
        }
        metrics.record_allowed();
        metrics.record_allowed();
        metrics.record_allowed();
        metrics.record_blocked();

        let snapshot = metrics.snapshot(2, 0);
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.allowed_requests, 3);
        assert_eq!(snapshot.blocked_requests, 1);
        assert!((snapshot.allowed_rate - 0.75).abs() < f64::EPSILON);
        assert!((snapshot.blocked_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(snapshot.active_limiters, 2);
    }

    #[test]
    fn test_snapshot_map_contains_all_fields() {
        let metrics = Metrics::new();
        metrics.record_request();

        let map = metrics.snapshot(1, 3).to_map();
        assert_eq!(map["total_requests"], 1);
        assert_eq!(map["reset_count"], 3);
        assert!(map.contains_key("uptime_secs"));
        assert!(map.contains_key("allowed_rate"));
    }

    #[test]
    fn test_reset_count_is_caller_supplied() {
        let metrics = Metrics::new();

        // The same metrics object reports whatever eviction count its
        // owning component tracks; there is no second counter here.
        assert_eq!(metrics.snapshot(0, 0).reset_count, 0);
        assert_eq!(metrics.snapshot(0, 7).reset_count, 7);
    }
}

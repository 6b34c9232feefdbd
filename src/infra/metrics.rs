//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally - these are
//! statistical counters only. Do NOT use them for coordination or logic
//! decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics. The `report()`
/// method swaps the windowed counters to get a consistent snapshot.
pub struct Metrics {
    /// Total engine events ever processed (monotonic)
    events_total: AtomicU64,
    /// Events since last report (reset on report)
    events_since_report: AtomicU64,
    /// Sum of processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Raw fixes received from the positioning source (monotonic)
    fixes_received: AtomicU64,
    /// Fixes that advanced the distance total (monotonic)
    fixes_accepted: AtomicU64,
    /// Fixes recorded in the route but below the noise gate (monotonic)
    fixes_below_gate: AtomicU64,
    /// Fixes rejected by the normalizer (monotonic)
    fixes_rejected: AtomicU64,
    /// Fixes ignored because no journey was active (monotonic)
    fixes_ignored: AtomicU64,
    /// Positioning source errors surfaced (monotonic)
    source_errors: AtomicU64,
    /// Journeys started (monotonic)
    journeys_started: AtomicU64,
    /// Journeys completed (monotonic)
    journeys_completed: AtomicU64,
    /// Journeys abandoned via reset while active (monotonic)
    journeys_abandoned: AtomicU64,
    /// Ingest events dropped because the engine channel was full (monotonic)
    ingest_dropped: AtomicU64,
    /// Live-feed messages dropped because the feed channel was full (monotonic)
    feed_dropped: AtomicU64,
    /// When the previous report window started
    last_report: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            fixes_received: AtomicU64::new(0),
            fixes_accepted: AtomicU64::new(0),
            fixes_below_gate: AtomicU64::new(0),
            fixes_rejected: AtomicU64::new(0),
            fixes_ignored: AtomicU64::new(0),
            source_errors: AtomicU64::new(0),
            journeys_started: AtomicU64::new(0),
            journeys_completed: AtomicU64::new(0),
            journeys_abandoned: AtomicU64::new(0),
            ingest_dropped: AtomicU64::new(0),
            feed_dropped: AtomicU64::new(0),
            last_report: Mutex::new(Instant::now()),
        }
    }

    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    pub fn record_fix_received(&self) {
        self.fixes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fix_accepted(&self) {
        self.fixes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fix_below_gate(&self) {
        self.fixes_below_gate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fix_rejected(&self) {
        self.fixes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fix_ignored(&self) {
        self.fixes_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_journey_started(&self) {
        self.journeys_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_journey_completed(&self) {
        self.journeys_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_journey_abandoned(&self) {
        self.journeys_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingest_dropped(&self) {
        self.ingest_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feed_dropped(&self) {
        self.feed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    pub fn fixes_received(&self) -> u64 {
        self.fixes_received.load(Ordering::Relaxed)
    }

    pub fn fixes_accepted(&self) -> u64 {
        self.fixes_accepted.load(Ordering::Relaxed)
    }

    pub fn fixes_below_gate(&self) -> u64 {
        self.fixes_below_gate.load(Ordering::Relaxed)
    }

    pub fn fixes_rejected(&self) -> u64 {
        self.fixes_rejected.load(Ordering::Relaxed)
    }

    pub fn fixes_ignored(&self) -> u64 {
        self.fixes_ignored.load(Ordering::Relaxed)
    }

    pub fn source_errors(&self) -> u64 {
        self.source_errors.load(Ordering::Relaxed)
    }

    pub fn journeys_started(&self) -> u64 {
        self.journeys_started.load(Ordering::Relaxed)
    }

    pub fn journeys_completed(&self) -> u64 {
        self.journeys_completed.load(Ordering::Relaxed)
    }

    pub fn journeys_abandoned(&self) -> u64 {
        self.journeys_abandoned.load(Ordering::Relaxed)
    }

    pub fn ingest_dropped(&self) -> u64 {
        self.ingest_dropped.load(Ordering::Relaxed)
    }

    pub fn feed_dropped(&self) -> u64 {
        self.feed_dropped.load(Ordering::Relaxed)
    }

    /// Snapshot the current window and reset the windowed counters.
    pub fn report(&self) -> MetricsSummary {
        let mut last_report = self.last_report.lock();
        let window_secs = last_report.elapsed().as_secs_f64();
        *last_report = Instant::now();
        drop(last_report);

        let events = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);

        MetricsSummary {
            events_total: self.events_total(),
            events_per_sec: if window_secs > 0.0 { events as f64 / window_secs } else { 0.0 },
            avg_latency_us: if events > 0 { latency_sum / events } else { 0 },
            max_latency_us: latency_max,
            fixes_received: self.fixes_received(),
            fixes_accepted: self.fixes_accepted(),
            fixes_below_gate: self.fixes_below_gate(),
            fixes_rejected: self.fixes_rejected(),
            fixes_ignored: self.fixes_ignored(),
            journeys_completed: self.journeys_completed(),
            journeys_abandoned: self.journeys_abandoned(),
            ingest_dropped: self.ingest_dropped(),
            feed_dropped: self.feed_dropped(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time summary produced by `Metrics::report`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub fixes_received: u64,
    pub fixes_accepted: u64,
    pub fixes_below_gate: u64,
    pub fixes_rejected: u64,
    pub fixes_ignored: u64,
    pub journeys_completed: u64,
    pub journeys_abandoned: u64,
    pub ingest_dropped: u64,
    pub feed_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = %format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            fixes_received = %self.fixes_received,
            fixes_accepted = %self.fixes_accepted,
            fixes_below_gate = %self.fixes_below_gate,
            fixes_rejected = %self.fixes_rejected,
            fixes_ignored = %self.fixes_ignored,
            journeys_completed = %self.journeys_completed,
            journeys_abandoned = %self.journeys_abandoned,
            ingest_dropped = %self.ingest_dropped,
            feed_dropped = %self.feed_dropped,
            "metrics_summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_fix_received();
        metrics.record_fix_received();
        metrics.record_fix_accepted();
        metrics.record_fix_rejected();
        metrics.record_journey_completed();

        assert_eq!(metrics.fixes_received(), 2);
        assert_eq!(metrics.fixes_accepted(), 1);
        assert_eq!(metrics.fixes_rejected(), 1);
        assert_eq!(metrics.journeys_completed(), 1);
    }

    #[test]
    fn test_report_resets_window() {
        let metrics = Metrics::new();
        metrics.record_event_processed(100);
        metrics.record_event_processed(300);

        let summary = metrics.report();
        assert_eq!(summary.events_total, 2);
        assert_eq!(summary.avg_latency_us, 200);
        assert_eq!(summary.max_latency_us, 300);

        // Window counters reset, monotonic total kept
        let summary = metrics.report();
        assert_eq!(summary.events_total, 2);
        assert_eq!(summary.avg_latency_us, 0);
        assert_eq!(summary.max_latency_us, 0);
    }

    #[test]
    fn test_atomic_max() {
        let max = AtomicU64::new(0);
        update_atomic_max(&max, 10);
        update_atomic_max(&max, 5);
        update_atomic_max(&max, 20);
        assert_eq!(max.load(Ordering::Relaxed), 20);
    }
}

//! Prometheus Metrics for Ingestion Runs
//!
//! Metrics include:
//! - runs by final status and run duration
//! - latency per run phase (histogram)
//! - feed fetch outcomes and in-flight fetches
//! - articles stored and author upserts

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, TextEncoder,
};
use tracing::error;

// ============================================
// METRIC DEFINITIONS
// ============================================

static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ingestion_runs_total",
        "Ingestion runs by final status",
        &["status"]
    ).expect("Failed to create runs_total metric")
});

static RUN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    let buckets = vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0];
    register_histogram!(
        HistogramOpts::new(
            "ingestion_run_duration_seconds",
            "Wall-clock duration of ingestion runs"
        ).buckets(buckets)
    ).expect("Failed to create run_duration metric")
});

static PHASE_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0];
    register_histogram_vec!(
        HistogramOpts::new(
            "ingestion_phase_latency_seconds",
            "Latency of each run phase in seconds"
        ).buckets(buckets),
        &["phase"]
    ).expect("Failed to create phase_latency metric")
});

static FEED_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ingestion_feed_fetches_total",
        "Feed fetches by outcome",
        &["outcome"]
    ).expect("Failed to create feed_fetches metric")
});

static FETCHES_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "ingestion_fetches_in_flight",
        "Feed fetches currently holding a concurrency permit"
    ).expect("Failed to create fetches_in_flight metric")
});

static ARTICLES_STORED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ingestion_articles_stored_total",
        "Articles written to the article store"
    ).expect("Failed to create articles_stored metric")
});

static AUTHOR_UPSERTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ingestion_author_upserts_total",
        "Author upserts by result status",
        &["status"]
    ).expect("Failed to create author_upserts metric")
});

// ============================================
// METRICS API
// ============================================

pub fn record_run_finished(status: &str, duration_secs: f64) {
    RUNS_TOTAL.with_label_values(&[status]).inc();
    RUN_DURATION.observe(duration_secs);
}

pub fn record_phase_latency(phase: &str, latency_secs: f64) {
    PHASE_LATENCY.with_label_values(&[phase]).observe(latency_secs);
}

/// `outcome` is one of `ok`, `error`, `timeout`, `panic`
pub fn record_feed_fetch(outcome: &str) {
    FEED_FETCHES.with_label_values(&[outcome]).inc();
}

pub fn inc_fetches_in_flight() {
    FETCHES_IN_FLIGHT.inc();
}

pub fn dec_fetches_in_flight() {
    FETCHES_IN_FLIGHT.dec();
}

pub fn record_articles_stored(count: u64) {
    ARTICLES_STORED.inc_by(count);
}

pub fn record_author_upsert(status: &str) {
    AUTHOR_UPSERTS.with_label_values(&[status]).inc();
}

// ============================================
// METRICS COLLECTION
// ============================================

/// Collects all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// Records the latency of a run phase when dropped
pub struct PhaseTimer {
    phase: &'static str,
    start: std::time::Instant,
}

impl PhaseTimer {
    pub fn new(phase: &'static str) -> Self {
        Self {
            phase,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        record_phase_latency(self.phase, self.start.elapsed().as_secs_f64());
    }
}

/// Guard that keeps the in-flight fetch gauge accurate across early returns
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn new() -> Self {
        inc_fetches_in_flight();
        Self
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        dec_fetches_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        record_run_finished("completed", 12.5);
        record_feed_fetch("ok");
        record_articles_stored(3);
        record_author_upsert("created");

        let metrics = gather_metrics();
        assert!(metrics.contains("ingestion_runs_total"));
        assert!(metrics.contains("ingestion_run_duration_seconds"));
        assert!(metrics.contains("ingestion_feed_fetches_total"));
        assert!(metrics.contains("ingestion_author_upserts_total"));
    }

    #[test]
    fn test_phase_timer() {
        {
            let _timer = PhaseTimer::new("fetching_feeds");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let metrics = gather_metrics();
        assert!(metrics.contains("ingestion_phase_latency_seconds"));
    }
}

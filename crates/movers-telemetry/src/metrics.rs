//! Prometheus metrics for the movers engine.
//!
//! Covers:
//! - Scan cycles (result, duration, universe size)
//! - Snapshot fetches (failures by reason, retries, unavailable answers)
//! - Mover churn (entered/left, active gauge)
//! - Live feeds (running gauge, ticks by outcome, terminations by reason)
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error caught at startup.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_int_gauge, Counter, CounterVec, Encoder, Gauge, Histogram, IntGauge, TextEncoder,
};

/// Scan cycles by result (completed/enumeration_failed).
pub static SCAN_CYCLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "movers_scan_cycles_total",
        "Total scan cycles by result",
        &["result"]
    )
    .unwrap()
});

/// Wall time of one scan (fan-out of all snapshot fetches).
pub static SCAN_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "movers_scan_duration_seconds",
        "Duration of the scanning phase in seconds",
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
    )
    .unwrap()
});

/// Instruments enumerated in the last successful cycle.
pub static UNIVERSE_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "movers_universe_size",
        "Instruments enumerated in the last cycle"
    )
    .unwrap()
});

/// Currently qualifying instruments.
pub static ACTIVE_MOVERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("movers_active", "Currently active movers").unwrap()
});

/// Effective threshold in percent.
pub static THRESHOLD_PCT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("movers_threshold_pct", "Mover threshold in percent").unwrap()
});

/// Snapshot fetches that failed after all attempts.
/// Labels: reason (http/timeout/api/parse)
pub static FETCH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "movers_fetch_failures_total",
        "Snapshot fetches that exhausted their retries",
        &["reason"]
    )
    .unwrap()
});

/// Snapshot fetch retries.
pub static FETCH_RETRIES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("movers_fetch_retries_total", "Snapshot fetch retries").unwrap()
});

/// Instruments with fewer than two completed candles.
pub static FETCH_UNAVAILABLE_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "movers_fetch_unavailable_total",
        "Instruments without two completed candles"
    )
    .unwrap()
});

/// Episodes opened. Labels: segment
pub static MOVERS_ENTERED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "movers_entered_total",
        "Mover episodes opened",
        &["segment"]
    )
    .unwrap()
});

/// Episodes closed. Labels: segment
pub static MOVERS_LEFT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("movers_left_total", "Mover episodes closed", &["segment"]).unwrap()
});

/// Live feed tasks currently registered.
pub static FEEDS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("movers_feeds_running", "Live feed tasks running").unwrap()
});

/// Ticks by outcome (recorded/out_of_order/dropped).
pub static TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "movers_ticks_total",
        "Price ticks by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Feed terminations. Labels: reason (stopped/stream_ended/stream_error/open_failed)
pub static FEED_TERMINATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "movers_feed_terminations_total",
        "Live feed terminations by reason",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn scan_completed(duration_secs: f64) {
        SCAN_CYCLES_TOTAL.with_label_values(&["completed"]).inc();
        SCAN_DURATION_SECONDS.observe(duration_secs);
    }

    pub fn enumeration_failed() {
        SCAN_CYCLES_TOTAL
            .with_label_values(&["enumeration_failed"])
            .inc();
    }

    pub fn universe_size(size: usize) {
        UNIVERSE_SIZE.set(size as i64);
    }

    pub fn active_movers(count: usize) {
        ACTIVE_MOVERS.set(count as i64);
    }

    pub fn threshold(pct: f64) {
        THRESHOLD_PCT.set(pct);
    }

    pub fn fetch_failed(reason: &str) {
        FETCH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn fetch_retry() {
        FETCH_RETRIES_TOTAL.inc();
    }

    pub fn fetch_unavailable() {
        FETCH_UNAVAILABLE_TOTAL.inc();
    }

    pub fn mover_entered(segment: &str) {
        MOVERS_ENTERED_TOTAL.with_label_values(&[segment]).inc();
    }

    pub fn mover_left(segment: &str) {
        MOVERS_LEFT_TOTAL.with_label_values(&[segment]).inc();
    }

    pub fn feeds_running(count: usize) {
        FEEDS_RUNNING.set(count as i64);
    }

    pub fn tick_recorded() {
        TICKS_TOTAL.with_label_values(&["recorded"]).inc();
    }

    pub fn tick_out_of_order() {
        TICKS_TOTAL.with_label_values(&["out_of_order"]).inc();
    }

    pub fn tick_dropped() {
        TICKS_TOTAL.with_label_values(&["dropped"]).inc();
    }

    pub fn feed_terminated(reason: &str) {
        FEED_TERMINATIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

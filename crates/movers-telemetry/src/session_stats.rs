//! Session statistics summary.
//!
//! Reads the process-wide counters and the scan duration histogram and
//! renders them as one structured log line.

use crate::metrics::{
    FETCH_FAILURES_TOTAL, FETCH_RETRIES_TOTAL, MOVERS_ENTERED_TOTAL, MOVERS_LEFT_TOTAL,
    SCAN_CYCLES_TOTAL, SCAN_DURATION_SECONDS, TICKS_TOTAL,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use tracing::info;

/// Totals since process start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub cycles_completed: u64,
    pub enumeration_failures: u64,
    pub movers_entered: u64,
    pub movers_left: u64,
    pub fetch_failures: u64,
    pub fetch_retries: u64,
    pub ticks_recorded: u64,
    pub ticks_out_of_order: u64,
    pub scan_p50_secs: f64,
    pub scan_p95_secs: f64,
}

/// Session statistics reporter.
pub struct SessionStatsReporter {
    start_time: DateTime<Utc>,
}

impl Default for SessionStatsReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatsReporter {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
        }
    }

    /// Snapshot the current totals.
    pub fn get_stats(&self) -> SessionStats {
        let (scan_p50_secs, scan_p95_secs) = scan_percentiles();
        SessionStats {
            cycles_completed: SCAN_CYCLES_TOTAL.with_label_values(&["completed"]).get() as u64,
            enumeration_failures: SCAN_CYCLES_TOTAL
                .with_label_values(&["enumeration_failed"])
                .get() as u64,
            movers_entered: sum_counter(&MOVERS_ENTERED_TOTAL),
            movers_left: sum_counter(&MOVERS_LEFT_TOTAL),
            fetch_failures: sum_counter(&FETCH_FAILURES_TOTAL),
            fetch_retries: FETCH_RETRIES_TOTAL.get() as u64,
            ticks_recorded: TICKS_TOTAL.with_label_values(&["recorded"]).get() as u64,
            ticks_out_of_order: TICKS_TOTAL.with_label_values(&["out_of_order"]).get() as u64,
            scan_p50_secs,
            scan_p95_secs,
        }
    }

    /// Log the session totals.
    pub fn output_summary(&self) {
        let s = self.get_stats();
        let uptime = Utc::now() - self.start_time;
        info!(
            uptime_min = uptime.num_minutes(),
            cycles = s.cycles_completed,
            enumeration_failures = s.enumeration_failures,
            entered = s.movers_entered,
            left = s.movers_left,
            fetch_failures = s.fetch_failures,
            fetch_retries = s.fetch_retries,
            ticks = s.ticks_recorded,
            ticks_out_of_order = s.ticks_out_of_order,
            scan_p50_secs = format!("{:.2}", s.scan_p50_secs),
            scan_p95_secs = format!("{:.2}", s.scan_p95_secs),
            "Session statistics"
        );
    }
}

/// Sum a counter over all label values.
fn sum_counter(counter: &prometheus::CounterVec) -> u64 {
    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value())
        .sum::<f64>() as u64
}

fn scan_percentiles() -> (f64, f64) {
    let families = SCAN_DURATION_SECONDS.collect();
    let Some(h) = families
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_histogram())
        .next()
    else {
        return (0.0, 0.0);
    };

    let count = h.get_sample_count();
    if count == 0 {
        return (0.0, 0.0);
    }
    let buckets = h.get_bucket();
    (
        percentile_from_buckets(buckets, count, 0.50),
        percentile_from_buckets(buckets, count, 0.95),
    )
}

/// Percentile from cumulative histogram buckets, interpolated linearly
/// inside the bucket that contains the target rank.
fn percentile_from_buckets(
    buckets: &[prometheus::proto::Bucket],
    total_count: u64,
    percentile: f64,
) -> f64 {
    let target = ((total_count as f64 * percentile).ceil() as u64).max(1);
    let mut prev_bound = 0.0;
    let mut prev_count = 0u64;

    for bucket in buckets {
        let upper_bound = bucket.get_upper_bound();
        let cumulative_count = bucket.get_cumulative_count();

        if cumulative_count >= target {
            let bucket_count = cumulative_count - prev_count;
            if bucket_count == 0 {
                return upper_bound;
            }
            let position = (target - prev_count) as f64 / bucket_count as f64;
            return prev_bound + position * (upper_bound - prev_bound);
        }

        prev_bound = upper_bound;
        prev_count = cumulative_count;
    }

    buckets.last().map(|b| b.get_upper_bound()).unwrap_or(0.0)
}

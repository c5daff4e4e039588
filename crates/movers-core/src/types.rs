//! Common data types for mover tracking.
//!
//! Contains the per-instrument state kept by the store (latest price sample,
//! mover episode record), the candle pair returned by the snapshot client and
//! the scan loop status summary.

use crate::Price;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest known price for an instrument, sourced from the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: Price,
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    pub fn new(price: Price, observed_at: DateTime<Utc>) -> Self {
        Self { price, observed_at }
    }
}

/// Single real-time price update delivered by a streaming subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTick {
    pub price: Price,
    /// Exchange timestamp of the message carrying the tick.
    pub observed_at: DateTime<Utc>,
}

/// Two most recent completed candle closes of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandlePair {
    pub prev_close: Price,
    pub last_close: Price,
    /// Start time of the previous candle.
    pub prev_time: DateTime<Utc>,
    /// Start time of the latest completed candle.
    pub last_time: DateTime<Utc>,
}

impl CandlePair {
    /// Percentage change between the two closes.
    ///
    /// Returns None if the previous close is zero or the change overflows.
    pub fn change_pct(&self) -> Option<Decimal> {
        self.last_close.pct_from(self.prev_close)
    }
}

/// One continuous episode during which an instrument qualified as a mover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoverRecord {
    /// When the instrument crossed the threshold.
    pub entered_at: DateTime<Utc>,
    /// When the instrument dropped below the threshold (None while active).
    pub left_at: Option<DateTime<Utc>>,
    /// Signed change with the largest magnitude seen during the episode.
    pub max_abs_change_pct: Decimal,
    /// Close price used by the scan that opened the episode.
    pub entry_price: Price,
}

impl MoverRecord {
    /// Open a new episode.
    pub fn open(entered_at: DateTime<Utc>, change_pct: Decimal, entry_price: Price) -> Self {
        Self {
            entered_at,
            left_at: None,
            max_abs_change_pct: change_pct,
            entry_price,
        }
    }

    /// Whether the episode is still open.
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }

    /// Raise the extreme deviation if `change_pct` has a larger magnitude.
    ///
    /// Frozen once the episode is closed. Returns true if the value changed.
    pub fn observe_change(&mut self, change_pct: Decimal) -> bool {
        if !self.is_active() || change_pct.abs() <= self.max_abs_change_pct.abs() {
            return false;
        }
        self.max_abs_change_pct = change_pct;
        true
    }

    /// Close the episode. Idempotent; returns true only on the first call.
    ///
    /// `left_at` is clamped so it never precedes `entered_at`.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.left_at = Some(now.max(self.entered_at));
        true
    }

    /// Percentage change of `price` relative to the entry price.
    pub fn change_since_entry_pct(&self, price: Price) -> Option<Decimal> {
        price.pct_from(self.entry_price)
    }
}

/// Scan loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Starting,
    Enumerating,
    EnumerationFailed,
    Scanning,
    Diffing,
    Sleeping,
    Stopped,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Enumerating => write!(f, "ENUMERATING"),
            Self::EnumerationFailed => write!(f, "ENUMERATION_FAILED"),
            Self::Scanning => write!(f, "SCANNING"),
            Self::Diffing => write!(f, "DIFFING"),
            Self::Sleeping => write!(f, "SLEEPING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Observability summary of the scan loop. Last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub phase: ScanPhase,
    /// Human readable description of the current phase.
    pub message: String,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub universe_size: usize,
    pub active_count: usize,
    /// Last enumeration error, cleared by the next successful enumeration.
    pub last_error: Option<String>,
    /// Number of completed scan cycles.
    pub cycle: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_candle_pair_change() {
        let pair = CandlePair {
            prev_close: Price::new(dec!(100)),
            last_close: Price::new(dec!(105)),
            prev_time: t0(),
            last_time: t0() + Duration::minutes(15),
        };
        assert_eq!(pair.change_pct(), Some(dec!(5)));
    }

    #[test]
    fn test_record_keeps_largest_magnitude() {
        let mut record = MoverRecord::open(t0(), dec!(12), Price::new(dec!(112)));

        assert!(!record.observe_change(dec!(8)));
        assert!(!record.observe_change(dec!(-12)));
        assert_eq!(record.max_abs_change_pct, dec!(12));

        assert!(record.observe_change(dec!(-15)));
        assert_eq!(record.max_abs_change_pct, dec!(-15));
    }

    #[test]
    fn test_record_frozen_after_close() {
        let mut record = MoverRecord::open(t0(), dec!(12), Price::new(dec!(112)));
        let left = t0() + Duration::minutes(2);

        assert!(record.close(left));
        assert!(!record.close(left + Duration::minutes(1)));
        assert_eq!(record.left_at, Some(left));

        assert!(!record.observe_change(dec!(40)));
        assert_eq!(record.max_abs_change_pct, dec!(12));
    }

    #[test]
    fn test_close_never_before_entry() {
        let mut record = MoverRecord::open(t0(), dec!(-11), Price::new(dec!(89)));
        record.close(t0() - Duration::seconds(5));
        assert_eq!(record.left_at, Some(t0()));
    }

    #[test]
    fn test_change_since_entry() {
        let record = MoverRecord::open(t0(), dec!(12), Price::new(dec!(112)));
        assert_eq!(
            record.change_since_entry_pct(Price::new(dec!(123.2))),
            Some(dec!(10))
        );
    }

    #[test]
    fn test_scan_phase_display() {
        assert_eq!(ScanPhase::Enumerating.to_string(), "ENUMERATING");
        assert_eq!(
            ScanPhase::EnumerationFailed.to_string(),
            "ENUMERATION_FAILED"
        );
    }
}

//! Scanner configuration.

use crate::error::{DetectorError, DetectorResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for change scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Absolute change in percent an instrument must exceed to qualify.
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: Decimal,
    /// Candle interval in minutes.
    #[serde(default = "default_kline_interval_min")]
    pub kline_interval_min: u32,
    /// Upper bound on concurrent snapshot fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Attempts per fetch, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// HTTP request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_threshold_pct() -> Decimal {
    Decimal::from(10)
}

fn default_kline_interval_min() -> u32 {
    15
}

fn default_max_concurrent_fetches() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            threshold_pct: default_threshold_pct(),
            kline_interval_min: default_kline_interval_min(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ScannerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> DetectorResult<()> {
        if self.threshold_pct <= Decimal::ZERO {
            return Err(DetectorError::ConfigError(format!(
                "threshold_pct ({}) must be positive",
                self.threshold_pct
            )));
        }
        if self.kline_interval_min == 0 {
            return Err(DetectorError::ConfigError(
                "kline_interval_min must be positive".to_string(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(DetectorError::ConfigError(
                "max_concurrent_fetches must be positive".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(DetectorError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(DetectorError::ConfigError(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Fixed-backoff retry policy for snapshot fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ScannerConfig::default().retry_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.threshold_pct, dec!(10));
        assert_eq!(config.kline_interval_min, 15);
        assert!(config.validate().is_ok());

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ScannerConfig {
            threshold_pct: dec!(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ScannerConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ScannerConfig {
            max_concurrent_fetches: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

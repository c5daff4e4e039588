//! Change scanner.
//!
//! One scan fetches the latest candle pair of every instrument of the
//! universe concurrently, retrying each fetch with a fixed backoff, and
//! keeps the instruments whose absolute close-to-close change is strictly
//! greater than the threshold. A failing instrument never fails the scan.

use crate::config::{RetryPolicy, ScannerConfig};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use movers_core::{CandlePair, InstrumentKey, Price};
use movers_registry::{DynMarketDataSource, RegistryError};
use movers_telemetry::Metrics;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A qualifying instrument's change and the candles it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qualification {
    /// Signed change in percent.
    pub change_pct: Decimal,
    pub prev_close: Price,
    pub last_close: Price,
    pub prev_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
}

/// Result of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub qualifying: HashMap<InstrumentKey, Qualification>,
    /// Instruments with a usable candle pair.
    pub scanned: usize,
    /// Instruments whose fetch failed after all attempts.
    pub failed: usize,
    /// Instruments with fewer than two completed candles, or closes the
    /// change cannot be computed from.
    pub unavailable: usize,
}

/// Outcome of fetching one instrument.
enum Fetched {
    Pair(CandlePair),
    NotAvailable,
    Failed(RegistryError),
}

/// Whether `change_pct` exceeds `threshold` in magnitude.
pub fn qualifies(change_pct: Decimal, threshold: Decimal) -> bool {
    change_pct.abs() > threshold
}

/// Evaluate a candle pair against `threshold`.
///
/// Returns None if the pair does not qualify or its change is not computable.
pub fn evaluate(pair: &CandlePair, threshold: Decimal) -> Option<Qualification> {
    let change_pct = pair.change_pct()?;
    qualifies(change_pct, threshold).then_some(Qualification {
        change_pct,
        prev_close: pair.prev_close,
        last_close: pair.last_close,
        prev_time: pair.prev_time,
        last_time: pair.last_time,
    })
}

/// Change scanner.
pub struct ChangeScanner {
    source: DynMarketDataSource,
    retry: RetryPolicy,
    max_concurrent: usize,
}

impl ChangeScanner {
    pub fn new(source: DynMarketDataSource, config: &ScannerConfig) -> Self {
        Self {
            source,
            retry: config.retry_policy(),
            max_concurrent: config.max_concurrent_fetches.max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Scan `universe` against `threshold`.
    pub async fn scan(&self, universe: &[InstrumentKey], threshold: Decimal) -> ScanOutcome {
        let fetches: Vec<_> = universe
            .iter()
            .map(|key| async move { (key, self.fetch_with_retry(key).await) })
            .collect();
        let results: Vec<(&InstrumentKey, Fetched)> = stream::iter(fetches)
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut outcome = ScanOutcome::default();
        for (key, fetched) in results {
            match fetched {
                Fetched::Pair(pair) => {
                    if pair.change_pct().is_none() {
                        debug!(%key, prev_close = %pair.prev_close, last_close = %pair.last_close, "Change not computable");
                        outcome.unavailable += 1;
                        continue;
                    }
                    outcome.scanned += 1;
                    if let Some(q) = evaluate(&pair, threshold) {
                        outcome.qualifying.insert(key.clone(), q);
                    }
                }
                Fetched::NotAvailable => {
                    Metrics::fetch_unavailable();
                    outcome.unavailable += 1;
                }
                Fetched::Failed(e) => {
                    Metrics::fetch_failed(e.reason());
                    debug!(%key, error = %e, "Snapshot fetch failed, skipping this cycle");
                    outcome.failed += 1;
                }
            }
        }

        if outcome.failed > 0 {
            warn!(
                failed = outcome.failed,
                universe = universe.len(),
                "Some snapshot fetches failed"
            );
        }
        info!(
            scanned = outcome.scanned,
            qualifying = outcome.qualifying.len(),
            unavailable = outcome.unavailable,
            failed = outcome.failed,
            threshold_pct = %threshold,
            "Scan complete"
        );
        outcome
    }

    async fn fetch_with_retry(&self, key: &InstrumentKey) -> Fetched {
        let mut attempt = 1;
        loop {
            match self.source.fetch_last_two_closes(key).await {
                Ok(Some(pair)) => return Fetched::Pair(pair),
                Ok(None) => return Fetched::NotAvailable,
                Err(e) if attempt < self.retry.max_attempts => {
                    debug!(%key, attempt, error = %e, "Snapshot fetch failed, retrying");
                    Metrics::fetch_retry();
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Fetched::Failed(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use movers_core::Segment;
    use movers_registry::MockMarketData;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    fn key(symbol: &str) -> InstrumentKey {
        InstrumentKey::new(symbol, Segment::Spot)
    }

    fn scanner(mock: &Arc<MockMarketData>) -> ChangeScanner {
        ChangeScanner::new(mock.clone(), &ScannerConfig::default())
    }

    #[test]
    fn test_threshold_is_strict_and_symmetric() {
        assert!(qualifies(dec!(10.01), dec!(10)));
        assert!(qualifies(dec!(-10.01), dec!(10)));
        assert!(!qualifies(dec!(10), dec!(10)));
        assert!(!qualifies(dec!(-10), dec!(10)));
        assert!(!qualifies(dec!(0), dec!(10)));
    }

    #[tokio::test]
    async fn test_plus_twelve_qualifies_plus_five_does_not() {
        let mock = Arc::new(MockMarketData::new());
        let (up, flat, down) = (key("UPUSDT"), key("FLATUSDT"), key("DOWNUSDT"));
        mock.set_closes(&up, dec!(100), dec!(112));
        mock.set_closes(&flat, dec!(100), dec!(105));
        mock.set_closes(&down, dec!(100), dec!(88));

        let universe = vec![up.clone(), flat.clone(), down.clone()];
        let outcome = scanner(&mock).scan(&universe, dec!(10)).await;

        assert_eq!(outcome.scanned, 3);
        assert_eq!(outcome.qualifying.len(), 2);
        let q = outcome.qualifying[&up];
        assert_eq!(q.change_pct, dec!(12));
        assert_eq!(q.last_close, Price::new(dec!(112)));
        assert_eq!(outcome.qualifying[&down].change_pct, dec!(-12));
        assert!(!outcome.qualifying.contains_key(&flat));
    }

    #[tokio::test]
    async fn test_zero_prev_close_and_missing_candles() {
        let mock = Arc::new(MockMarketData::new());
        let (zero, missing) = (key("ZEROUSDT"), key("NEWUSDT"));
        mock.set_closes(&zero, dec!(0), dec!(5));

        let outcome = scanner(&mock)
            .scan(&[zero.clone(), missing.clone()], dec!(10))
            .await;

        assert!(outcome.qualifying.is_empty());
        assert_eq!(outcome.unavailable, 2);
        assert_eq!(outcome.failed, 0);
        // not-available answers are not retried
        assert_eq!(mock.fetch_calls(&missing), 1);
    }

    #[tokio::test]
    async fn test_overflowing_change_counts_as_unavailable() {
        let mock = Arc::new(MockMarketData::new());
        let (tiny, good) = (key("DUSTUSDT"), key("GOODUSDT"));
        mock.set_closes(&tiny, dec!(0.0000000000000000000000000001), dec!(5));
        mock.set_closes(&good, dec!(100), dec!(112));

        let outcome = scanner(&mock)
            .scan(&[tiny.clone(), good.clone()], dec!(10))
            .await;

        assert_eq!(outcome.unavailable, 1);
        assert_eq!(outcome.scanned, 1);
        assert!(!outcome.qualifying.contains_key(&tiny));
        assert_eq!(outcome.qualifying[&good].change_pct, dec!(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_backoff() {
        let mock = Arc::new(MockMarketData::new());
        let k = key("BTCUSDT");
        mock.set_closes(&k, dec!(100), dec!(120));
        mock.fail_fetches(&k, 2);

        let started = tokio::time::Instant::now();
        let outcome = scanner(&mock).scan(&[k.clone()], dec!(10)).await;

        assert_eq!(mock.fetch_calls(&k), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(outcome.qualifying[&k].change_pct, dec!(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_skip_instrument() {
        let mock = Arc::new(MockMarketData::new());
        let (bad, good) = (key("BADUSDT"), key("GOODUSDT"));
        mock.set_closes(&bad, dec!(100), dec!(150));
        mock.fail_fetches(&bad, u32::MAX);
        mock.set_closes(&good, dec!(100), dec!(111));

        let outcome = scanner(&mock)
            .scan(&[bad.clone(), good.clone()], dec!(10))
            .await;

        assert_eq!(mock.fetch_calls(&bad), 3);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.scanned, 1);
        assert!(outcome.qualifying.contains_key(&good));
        assert!(!outcome.qualifying.contains_key(&bad));
    }

    #[tokio::test]
    async fn test_large_universe_bounded_fanout() {
        let mock = Arc::new(MockMarketData::new());
        let universe: Vec<_> = (0..1000).map(|i| key(&format!("SYM{i}"))).collect();
        for (i, k) in universe.iter().enumerate() {
            let last = if i % 10 == 0 { dec!(115) } else { dec!(101) };
            mock.set_closes(k, dec!(100), last);
        }

        let config = ScannerConfig {
            max_concurrent_fetches: 16,
            ..Default::default()
        };
        let outcome = ChangeScanner::new(mock.clone(), &config)
            .scan(&universe, dec!(10))
            .await;

        assert_eq!(outcome.scanned, 1000);
        assert_eq!(outcome.qualifying.len(), 100);
    }
}

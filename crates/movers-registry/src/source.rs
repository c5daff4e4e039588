//! Market data source trait and a scripted mock.

use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Duration, Utc};
use movers_core::{CandlePair, InstrumentKey, Price, Segment};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Source of the instrument universe and candle snapshots.
///
/// Implemented by the REST client in production and by `MockMarketData`
/// in tests.
pub trait MarketDataSource: Send + Sync {
    /// List every tradable instrument of the given segments.
    fn list_universe<'a>(
        &'a self,
        segments: &'a [Segment],
    ) -> BoxFuture<'a, RegistryResult<Vec<InstrumentKey>>>;

    /// Fetch the two most recent completed candles.
    ///
    /// `Ok(None)` means the instrument has fewer than two completed candles.
    fn fetch_last_two_closes<'a>(
        &'a self,
        key: &'a InstrumentKey,
    ) -> BoxFuture<'a, RegistryResult<Option<CandlePair>>>;
}

/// Arc wrapper for MarketDataSource trait objects.
pub type DynMarketDataSource = Arc<dyn MarketDataSource>;

#[derive(Debug, Default)]
struct MockState {
    universe: Vec<InstrumentKey>,
    candles: HashMap<InstrumentKey, CandlePair>,
    /// Remaining failing attempts per key; `u32::MAX` fails forever.
    fetch_failures: HashMap<InstrumentKey, u32>,
    fetch_calls: HashMap<InstrumentKey, u32>,
}

/// Scripted market data source for testing.
///
/// Instruments without scripted candles answer `Ok(None)`.
#[derive(Debug, Default)]
pub struct MockMarketData {
    state: Mutex<MockState>,
    /// Number of upcoming `list_universe` calls that fail.
    enumeration_failures: AtomicU32,
    list_calls: AtomicU32,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_universe(&self, universe: Vec<InstrumentKey>) {
        self.state.lock().universe = universe;
    }

    /// Script the two latest closes of `key`.
    pub fn set_closes(&self, key: &InstrumentKey, prev_close: Decimal, last_close: Decimal) {
        let prev_time = DateTime::<Utc>::default() + Duration::minutes(15);
        let pair = CandlePair {
            prev_close: Price::new(prev_close),
            last_close: Price::new(last_close),
            prev_time,
            last_time: prev_time + Duration::minutes(15),
        };
        self.state.lock().candles.insert(key.clone(), pair);
    }

    pub fn clear_closes(&self, key: &InstrumentKey) {
        self.state.lock().candles.remove(key);
    }

    /// Make the next `attempts` fetches of `key` fail.
    pub fn fail_fetches(&self, key: &InstrumentKey, attempts: u32) {
        self.state.lock().fetch_failures.insert(key.clone(), attempts);
    }

    /// Make the next `calls` universe listings fail.
    pub fn fail_enumerations(&self, calls: u32) {
        self.enumeration_failures.store(calls, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self, key: &InstrumentKey) -> u32 {
        self.state.lock().fetch_calls.get(key).copied().unwrap_or(0)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl MarketDataSource for MockMarketData {
    fn list_universe<'a>(
        &'a self,
        segments: &'a [Segment],
    ) -> BoxFuture<'a, RegistryResult<Vec<InstrumentKey>>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .enumeration_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RegistryError::Enumeration(
                    "mock: connection refused".to_string(),
                ));
            }
            Ok(self
                .state
                .lock()
                .universe
                .iter()
                .filter(|key| segments.contains(&key.segment))
                .cloned()
                .collect())
        })
    }

    fn fetch_last_two_closes<'a>(
        &'a self,
        key: &'a InstrumentKey,
    ) -> BoxFuture<'a, RegistryResult<Option<CandlePair>>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            *state.fetch_calls.entry(key.clone()).or_insert(0) += 1;

            if let Some(remaining) = state.fetch_failures.get_mut(key) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(RegistryError::Fetch {
                        key: key.to_string(),
                        source: Box::new(RegistryError::HttpClient("mock: HTTP 503".to_string())),
                    });
                }
            }

            Ok(state.candles.get(key).copied())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_scripted_failures_then_success() {
        let mock = MockMarketData::new();
        let key = InstrumentKey::new("BTCUSDT", Segment::Spot);
        mock.set_closes(&key, dec!(100), dec!(112));
        mock.fail_fetches(&key, 1);

        assert!(mock.fetch_last_two_closes(&key).await.is_err());
        let pair = mock.fetch_last_two_closes(&key).await.unwrap().unwrap();
        assert_eq!(pair.change_pct(), Some(dec!(12)));
        assert_eq!(mock.fetch_calls(&key), 2);
    }

    #[tokio::test]
    async fn test_mock_universe_filters_segments() {
        let mock = MockMarketData::new();
        mock.set_universe(vec![
            InstrumentKey::new("BTCUSDT", Segment::Spot),
            InstrumentKey::new("BTCUSDT", Segment::Linear),
        ]);
        mock.fail_enumerations(1);

        assert!(mock.list_universe(&[Segment::Spot]).await.is_err());
        let keys = mock.list_universe(&[Segment::Spot]).await.unwrap();
        assert_eq!(keys, vec![InstrumentKey::new("BTCUSDT", Segment::Spot)]);
        assert_eq!(mock.list_calls(), 2);
    }
}

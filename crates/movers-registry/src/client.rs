//! HTTP client for the venue's public market endpoints.
//!
//! Two endpoints are used:
//! - `/v5/market/instruments-info` to enumerate the tradable universe
//!   (cursor paginated)
//! - `/v5/market/kline` to fetch the latest candles of one instrument
//!
//! Every response is wrapped in an envelope carrying `retCode`/`retMsg`;
//! a non-zero `retCode` is surfaced as `RegistryError::Api`.

use crate::error::{RegistryError, RegistryResult};
use crate::source::{BoxFuture, MarketDataSource};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use movers_core::{CandlePair, Clock, InstrumentKey, Price, Segment, SystemClock};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on instruments-info pages per segment.
const MAX_PAGES: usize = 100;

/// Page size requested from instruments-info.
const PAGE_LIMIT: &str = "1000";

/// Candles requested per instrument: the forming one plus two completed.
const KLINE_LIMIT: &str = "3";

/// Only instruments in this state are scanned.
const STATUS_TRADING: &str = "Trading";

/// Response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// One page of instruments-info.
#[derive(Debug, Deserialize)]
struct InstrumentsPage {
    #[serde(default)]
    list: Vec<RawInstrument>,
    #[serde(rename = "nextPageCursor", default)]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInstrument {
    symbol: String,
    #[serde(default)]
    status: String,
}

/// Kline result. Rows are `[startTime, open, high, low, close, volume, turnover]`,
/// newest first, all as strings.
#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

/// Client for the venue's public market data.
pub struct MarketDataClient {
    /// HTTP client.
    client: Client,
    /// REST base URL (e.g., "https://api.bybit.com").
    base_url: String,
    /// Candle interval in minutes.
    interval_min: u32,
    clock: Arc<dyn Clock>,
}

impl MarketDataClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - REST base URL (e.g., "https://api.bybit.com")
    /// * `interval_min` - Candle interval in minutes
    pub fn new(base_url: impl Into<String>, interval_min: u32) -> RegistryResult<Self> {
        Self::with_timeout(base_url, interval_min, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        interval_min: u32,
        timeout: Duration,
    ) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            interval_min,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used to decide which candles are complete.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// GET `path` and return the decoded `result` payload.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> RegistryResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(RegistryError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let body = response.text().await.map_err(RegistryError::from_reqwest)?;
        decode_result(&body)
    }

    async fn list_segment(&self, segment: Segment) -> RegistryResult<Vec<InstrumentKey>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;

        for page_no in 0..MAX_PAGES {
            let page: InstrumentsPage = {
                let mut query = vec![("category", segment.category()), ("limit", PAGE_LIMIT)];
                if let Some(cursor) = cursor.as_deref() {
                    query.push(("cursor", cursor));
                }
                self.get("/v5/market/instruments-info", &query).await?
            };
            let listed = page.list.len();
            keys.extend(trading_keys(page.list, segment));
            debug!(%segment, page = page_no, listed, "Fetched instruments page");

            match page.next_page_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => return Ok(keys),
            }
        }

        warn!(%segment, max_pages = MAX_PAGES, "Instrument pagination did not terminate");
        Ok(keys)
    }

    async fn enumerate(&self, segments: &[Segment]) -> RegistryResult<Vec<InstrumentKey>> {
        let mut universe = Vec::new();
        for &segment in segments {
            let keys = self
                .list_segment(segment)
                .await
                .map_err(|e| RegistryError::Enumeration(format!("{segment}: {e}")))?;
            info!(%segment, count = keys.len(), "Enumerated tradable instruments");
            universe.extend(keys);
        }
        Ok(universe)
    }

    async fn fetch_closes(&self, key: &InstrumentKey) -> RegistryResult<Option<CandlePair>> {
        let interval = self.interval_min.to_string();
        let query = [
            ("category", key.segment.category()),
            ("symbol", key.symbol.as_str()),
            ("interval", interval.as_str()),
            ("limit", KLINE_LIMIT),
        ];

        let result = async {
            let klines: KlineResult = self.get("/v5/market/kline", &query).await?;
            parse_completed_closes(
                &klines.list,
                ChronoDuration::minutes(i64::from(self.interval_min)),
                self.clock.now(),
            )
        }
        .await;

        result.map_err(|e| RegistryError::Fetch {
            key: key.to_string(),
            source: Box::new(e),
        })
    }
}

impl MarketDataSource for MarketDataClient {
    fn list_universe<'a>(
        &'a self,
        segments: &'a [Segment],
    ) -> BoxFuture<'a, RegistryResult<Vec<InstrumentKey>>> {
        Box::pin(self.enumerate(segments))
    }

    fn fetch_last_two_closes<'a>(
        &'a self,
        key: &'a InstrumentKey,
    ) -> BoxFuture<'a, RegistryResult<Option<CandlePair>>> {
        Box::pin(self.fetch_closes(key))
    }
}

/// Check the envelope and decode its `result`.
fn decode_result<T: DeserializeOwned>(body: &str) -> RegistryResult<T> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| RegistryError::ParseError(format!("Invalid response envelope: {e}")))?;

    if envelope.ret_code != 0 {
        return Err(RegistryError::Api {
            code: envelope.ret_code,
            msg: envelope.ret_msg,
        });
    }

    Ok(serde_json::from_value(envelope.result)?)
}

fn trading_keys(list: Vec<RawInstrument>, segment: Segment) -> impl Iterator<Item = InstrumentKey> {
    list.into_iter()
        .filter(|raw| raw.status == STATUS_TRADING && !raw.symbol.is_empty())
        .map(move |raw| InstrumentKey::new(raw.symbol, segment))
}

/// Pick the two most recent completed candles out of kline rows.
///
/// A candle is complete once `start + interval <= now`. Returns `Ok(None)`
/// when fewer than two complete candles remain.
pub fn parse_completed_closes(
    rows: &[Vec<String>],
    interval: ChronoDuration,
    now: DateTime<Utc>,
) -> RegistryResult<Option<CandlePair>> {
    let mut completed = Vec::with_capacity(rows.len());
    for row in rows {
        let (start, close) = parse_row(row)?;
        if start + interval <= now {
            completed.push((start, close));
        }
    }

    completed.sort_by(|a, b| b.0.cmp(&a.0));
    match completed.as_slice() {
        [(last_time, last_close), (prev_time, prev_close), ..] => Ok(Some(CandlePair {
            prev_close: *prev_close,
            last_close: *last_close,
            prev_time: *prev_time,
            last_time: *last_time,
        })),
        _ => Ok(None),
    }
}

fn parse_row(row: &[String]) -> RegistryResult<(DateTime<Utc>, Price)> {
    if row.len() < 5 {
        return Err(RegistryError::ParseError(format!(
            "Kline row has {} fields, expected at least 5",
            row.len()
        )));
    }

    let start_ms: i64 = row[0]
        .parse()
        .map_err(|e| RegistryError::ParseError(format!("Invalid kline start '{}': {e}", row[0])))?;
    let start = DateTime::from_timestamp_millis(start_ms)
        .ok_or_else(|| RegistryError::ParseError(format!("Kline start out of range: {start_ms}")))?;
    let close: Price = row[4]
        .parse()
        .map_err(|e| RegistryError::ParseError(format!("Invalid kline close '{}': {e}", row[4])))?;

    Ok((start, close))
}

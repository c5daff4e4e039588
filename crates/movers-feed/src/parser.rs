//! Ticker message parsing.
//!
//! Turns a `tickers.{SYMBOL}` push into a `PriceTick`. Snapshots always
//! carry `lastPrice`; linear/inverse deltas only carry the fields that
//! changed, so a delta without `lastPrice` is reported as `MissingPrice`
//! and dropped silently by the caller. A snapshot without it is malformed.

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, Utc};
use movers_core::{Price, PriceTick};
use movers_ws::TopicMessage;
use serde::Deserialize;

/// Fields of the ticker payload used here.
#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(rename = "lastPrice", default)]
    last_price: Option<String>,
}

/// Parse a ticker push for `expected_topic`.
///
/// `observed_at` is the message `ts`, or `received_at` when the push has none.
pub fn parse_ticker(
    msg: &TopicMessage,
    expected_topic: &str,
    received_at: DateTime<Utc>,
) -> FeedResult<PriceTick> {
    if msg.topic != expected_topic {
        return Err(FeedError::TopicMismatch {
            expected: expected_topic.to_string(),
            got: msg.topic.clone(),
        });
    }

    let raw: RawTicker = serde_json::from_value(msg.data.clone())
        .map_err(|e| FeedError::MalformedMessage(format!("{}: {e}", msg.topic)))?;

    let last_price = match raw.last_price.filter(|p| !p.is_empty()) {
        Some(p) => p,
        None if msg.is_delta() => return Err(FeedError::MissingPrice(msg.topic.clone())),
        None => {
            return Err(FeedError::MalformedMessage(format!(
                "{}: snapshot without lastPrice",
                msg.topic
            )))
        }
    };

    let price: Price = last_price
        .parse()
        .map_err(|e| FeedError::MalformedMessage(format!("lastPrice '{last_price}': {e}")))?;
    if !price.is_positive() {
        return Err(FeedError::MalformedMessage(format!(
            "non-positive lastPrice {price}"
        )));
    }

    let observed_at = msg
        .ts
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(received_at);

    Ok(PriceTick { price, observed_at })
}

//! Instrument identification types.
//!
//! The venue groups instruments into segments (its `category` parameter):
//! the same symbol can trade in several segments with independent prices,
//! so an instrument is identified by the pair (symbol, segment).

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market segment an instrument trades in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    /// Spot pairs.
    Spot,
    /// USDT/USDC margined perpetuals and futures.
    Linear,
    /// Coin margined contracts.
    Inverse,
}

impl Segment {
    pub const ALL: [Segment; 3] = [Segment::Spot, Segment::Linear, Segment::Inverse];

    /// Venue `category` value for REST requests and public stream paths.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Linear => "linear",
            Self::Inverse => "inverse",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

impl FromStr for Segment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "linear" => Ok(Self::Linear),
            "inverse" => Ok(Self::Inverse),
            other => Err(CoreError::UnknownSegment(other.to_string())),
        }
    }
}

/// Unique instrument identifier combining symbol and segment.
///
/// Primary key for every per-instrument structure in the engine.
/// Format: `{symbol}@{segment}` (e.g., "BTCUSDT@linear").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub symbol: String,
    pub segment: Segment,
}

impl InstrumentKey {
    pub fn new(symbol: impl Into<String>, segment: Segment) -> Self {
        Self {
            symbol: symbol.into(),
            segment,
        }
    }

    /// Public ticker topic for this instrument.
    pub fn ticker_topic(&self) -> String {
        format!("tickers.{}", self.symbol)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.segment)
    }
}

impl FromStr for InstrumentKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, segment) = s
            .split_once('@')
            .ok_or_else(|| CoreError::InvalidInstrumentKey(s.to_string()))?;
        if symbol.is_empty() {
            return Err(CoreError::InvalidInstrumentKey(s.to_string()));
        }
        Ok(Self::new(symbol, segment.parse()?))
    }
}

//! Instrument universe and candle snapshot client.
//!
//! Lists tradable instruments per market segment and fetches the two most
//! recent completed candles of an instrument from the venue REST API.
//! The `MarketDataSource` trait is the seam the scanner is written against.

pub mod client;
pub mod error;
pub mod source;

pub use client::{parse_completed_closes, MarketDataClient};
pub use error::{RegistryError, RegistryResult};
pub use source::{BoxFuture, DynMarketDataSource, MarketDataSource, MockMarketData};

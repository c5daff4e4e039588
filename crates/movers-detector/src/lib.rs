//! Universe-wide price change scanner.
//!
//! Fetches the two latest completed candles of every instrument, computes
//! the percentage change between their closes and reports the instruments
//! whose absolute change exceeds the threshold.

pub mod config;
pub mod error;
pub mod scanner;

pub use config::{RetryPolicy, ScannerConfig};
pub use error::{DetectorError, DetectorResult};
pub use scanner::{evaluate, qualifies, ChangeScanner, Qualification, ScanOutcome};

//! Core domain types for the movers detection engine.
//!
//! This crate provides the types shared by every other crate:
//! - `InstrumentKey`: Unique identifier for an instrument (symbol + segment)
//! - `Price`: Precision-safe price type
//! - `PriceSample`, `MoverRecord`: Per-instrument state kept by the store
//! - `CandlePair`: The two most recent completed candles of an instrument
//! - `ScanStatus`: Observability summary of the scan loop
//! - `Clock`: Injectable time source

pub mod clock;
pub mod decimal;
pub mod error;
pub mod market;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::Price;
pub use error::{CoreError, Result};
pub use market::{InstrumentKey, Segment};
pub use types::{CandlePair, MoverRecord, PriceSample, PriceTick, ScanPhase, ScanStatus};

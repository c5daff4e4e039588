//! Market movers detection and tracking service.
//!
//! Orchestrates the engine:
//! - Periodic universe enumeration and change scanning
//! - Mover set diffing into the state store
//! - One live price feed per active mover
//! - Read-only engine handle for status and snapshots
//! - Periodic mover summary logging

pub mod app;
pub mod config;
pub mod error;
pub mod scan_loop;
pub mod summary;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use scan_loop::{CycleOutcome, CycleReport, EngineHandle, ScanLoop, ScanSettings};
pub use summary::{MoverLine, MoverSummary};

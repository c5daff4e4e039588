//! Prometheus metrics and structured logging for the movers engine.
//!
//! - Prometheus metrics for scan cycles, fetch failures, mover churn and live feeds
//! - Structured logging with tracing (JSON in production)
//! - Session statistics summary for periodic and shutdown reports

pub mod error;
pub mod logging;
pub mod metrics;
pub mod session_stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with};
pub use metrics::Metrics;
pub use session_stats::{SessionStats, SessionStatsReporter};

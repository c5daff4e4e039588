//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,movers=debug";

/// Initialize structured logging with the default filter.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_logging() -> TelemetryResult<()> {
    init_logging_with(DEFAULT_FILTER)
}

/// Initialize structured logging.
///
/// Configures tracing with JSON output for production (`RUST_ENV=production`)
/// and pretty output for development. `default_filter` is used when
/// `RUST_LOG` is not set.
pub fn init_logging_with(default_filter: &str) -> TelemetryResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| TelemetryError::LoggingInit(format!("invalid filter '{default_filter}': {e}")))?,
    };

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

//! Error types for movers-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid instrument key: {0}")]
    InvalidInstrumentKey(String),

    #[error("Unknown segment: {0}")]
    UnknownSegment(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

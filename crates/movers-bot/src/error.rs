//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] movers_core::CoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] movers_feed::FeedError),

    #[error("Registry error: {0}")]
    Registry(#[from] movers_registry::RegistryError),

    #[error("Detector error: {0}")]
    Detector(#[from] movers_detector::DetectorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] movers_telemetry::TelemetryError),

    #[error("Scan loop task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type AppResult<T> = Result<T, AppError>;

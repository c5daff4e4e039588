//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Topic mismatch: expected {expected}, got {got}")]
    TopicMismatch { expected: String, got: String },

    #[error("No price in message: {0}")]
    MissingPrice(String),

    #[error("WebSocket error: {0}")]
    Ws(#[from] movers_ws::WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;

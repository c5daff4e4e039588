//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Universe enumeration failed: {0}")]
    Enumeration(String),

    #[error("Fetch failed for {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error: retCode={code}, retMsg={msg}")]
    Api { code: i64, msg: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RegistryError {
    /// Short failure class used as a metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Enumeration(_) => "enumeration",
            Self::Fetch { source, .. } => source.reason(),
            Self::HttpClient(_) => "http",
            Self::Timeout(_) => "timeout",
            Self::Api { .. } => "api",
            Self::ParseError(_) | Self::Json(_) => "parse",
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::HttpClient(format!("HTTP request failed: {e}"))
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_reason_follows_source() {
        let err = RegistryError::Fetch {
            key: "BTCUSDT@spot".to_string(),
            source: Box::new(RegistryError::Api {
                code: 10001,
                msg: "params error".to_string(),
            }),
        };
        assert_eq!(err.reason(), "api");
        assert!(err.to_string().contains("BTCUSDT@spot"));
    }
}

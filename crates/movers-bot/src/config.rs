//! Application configuration.
//!
//! Loaded from a TOML file, then overridden by `MOVERS__*` environment
//! variables (`__` separates nesting levels, e.g.
//! `MOVERS__SCANNER__THRESHOLD_PCT=7.5`, `MOVERS__SEGMENTS=spot,linear`).

use crate::error::{AppError, AppResult};
use movers_core::Segment;
use movers_detector::ScannerConfig;
use movers_feed::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Scan loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLoopConfig {
    /// Sleep between completed cycles.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Sleep after a failed universe enumeration.
    #[serde(default = "default_enumeration_cooldown_secs")]
    pub enumeration_cooldown_secs: u64,
}

fn default_scan_interval_secs() -> u64 {
    60
}

fn default_enumeration_cooldown_secs() -> u64 {
    10
}

impl Default for ScanLoopConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            enumeration_cooldown_secs: default_enumeration_cooldown_secs(),
        }
    }
}

/// Live feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Application-level ping interval (ms).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Pong deadline after a ping (ms).
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// WebSocket handshake timeout (ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Time a stopped feed gets to close its connection (ms).
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Per-feed message buffer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_ping_interval_ms() -> u64 {
    20_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Closed episodes older than this are dropped. 0 keeps them forever.
    #[serde(default = "default_archive_retention_secs")]
    pub archive_retention_secs: u64,
}

fn default_archive_retention_secs() -> u64 {
    86_400
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            archive_retention_secs: default_archive_retention_secs(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Interval of the mover summary log.
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
}

fn default_log_level() -> String {
    "info,movers=debug".to_string()
}

fn default_summary_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            summary_interval_secs: default_summary_interval_secs(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// REST base URL.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Public WebSocket base URL; the segment category is appended.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    /// Market segments to scan.
    #[serde(default = "default_segments")]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub scan_loop: ScanLoopConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_rest_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.bybit.com/v5/public".to_string()
}

fn default_segments() -> Vec<Segment> {
    vec![Segment::Spot, Segment::Linear]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            ws_base_url: default_ws_base_url(),
            segments: default_segments(),
            scanner: ScannerConfig::default(),
            scan_loop: ScanLoopConfig::default(),
            feed: FeedConfig::default(),
            store: StoreConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix("MOVERS")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("segments")
}

impl AppConfig {
    /// Load from `MOVERS_CONFIG` or the default path.
    ///
    /// Falls back to defaults (plus environment overrides) when the file
    /// does not exist.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("MOVERS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::build(config::Config::builder().add_source(env_source()))
        }
    }

    /// Load from a specific file, with environment overrides.
    pub fn from_file(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            return Err(AppError::Config(format!("Config file not found: {path}")));
        }
        Self::build(
            config::Config::builder()
                .add_source(config::File::new(path, config::FileFormat::Toml))
                .add_source(env_source()),
        )
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> AppResult<Self> {
        let config: Self = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| AppError::Config(format!("Failed to load config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> AppResult<()> {
        self.scanner.validate()?;

        let positive = [
            ("scan_loop.scan_interval_secs", self.scan_loop.scan_interval_secs),
            (
                "scan_loop.enumeration_cooldown_secs",
                self.scan_loop.enumeration_cooldown_secs,
            ),
            ("feed.ping_interval_ms", self.feed.ping_interval_ms),
            ("feed.pong_timeout_ms", self.feed.pong_timeout_ms),
            ("feed.connect_timeout_ms", self.feed.connect_timeout_ms),
            ("feed.stop_grace_ms", self.feed.stop_grace_ms),
            ("feed.channel_capacity", self.feed.channel_capacity as u64),
            (
                "telemetry.summary_interval_secs",
                self.telemetry.summary_interval_secs,
            ),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{name} must be positive")));
        }

        if self.segments.is_empty() {
            return Err(AppError::Config("segments must not be empty".to_string()));
        }
        if self.rest_url.is_empty() || self.ws_base_url.is_empty() {
            return Err(AppError::Config(
                "rest_url and ws_base_url must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {e}")))
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            ws_base_url: self.ws_base_url.clone(),
            ping_interval_ms: self.feed.ping_interval_ms,
            pong_timeout_ms: self.feed.pong_timeout_ms,
            connect_timeout_ms: self.feed.connect_timeout_ms,
            channel_capacity: self.feed.channel_capacity,
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.feed.stop_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.scanner.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("movers-{}-{name}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.segments, vec![Segment::Spot, Segment::Linear]);
        assert_eq!(config.scanner.threshold_pct, dec!(10));
        assert_eq!(config.scan_loop.scan_interval_secs, 60);
        assert_eq!(config.scan_loop.enumeration_cooldown_secs, 10);
        assert_eq!(config.feed.stop_grace_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bundled_default_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        assert_eq!(config.rest_url, "https://api.bybit.com");
        assert_eq!(config.scanner.kline_interval_min, 15);
        assert_eq!(config.feed.ping_interval_ms, 20_000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = write_temp(
            "partial",
            r#"
segments = ["linear", "inverse"]

[scanner]
threshold_pct = 7.5
max_attempts = 5
"#,
        );
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.segments, vec![Segment::Linear, Segment::Inverse]);
        assert_eq!(config.scanner.threshold_pct, dec!(7.5));
        assert_eq!(config.scanner.max_attempts, 5);
        assert_eq!(config.scanner.retry_backoff_ms, 2_000);
        assert_eq!(config.feed.channel_capacity, 256);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let path = write_temp("invalid", "[scanner]\nthreshold_pct = -1\n");
        assert!(AppConfig::from_file(&path).is_err());
        let _ = std::fs::remove_file(path);

        let mut config = AppConfig::default();
        config.scan_loop.scan_interval_secs = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = AppConfig::default();
        config.segments.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::from_file("/nonexistent/movers.toml").is_err());
    }

    #[test]
    fn test_env_override() {
        let path = write_temp("env", "[store]\narchive_retention_secs = 100\n");
        std::env::set_var("MOVERS__STORE__ARCHIVE_RETENTION_SECS", "42");
        let config = AppConfig::from_file(&path);
        std::env::remove_var("MOVERS__STORE__ARCHIVE_RETENTION_SECS");

        assert_eq!(config.unwrap().store.archive_retention_secs, 42);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_toml_output_reloads() {
        let config = AppConfig::default();
        let text = config.to_toml_string().unwrap();
        let path = write_temp("roundtrip", &text);
        let reloaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.scanner.threshold_pct, config.scanner.threshold_pct);
        assert_eq!(reloaded.segments, config.segments);
        let _ = std::fs::remove_file(path);
    }
}

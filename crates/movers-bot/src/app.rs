//! Main application orchestration.
//!
//! Wires the components together:
//! - REST market data client for enumeration and snapshots
//! - Ticker WebSocket source for live feeds
//! - Mover state store and feed manager
//! - Scan loop task
//! - Periodic mover and session summaries

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::scan_loop::{EngineHandle, ScanLoop, ScanSettings};
use crate::summary::{MoverSummary, DEFAULT_TOP_N};
use chrono::Utc;
use movers_feed::{DynPriceStreamSource, FeedManager, MoverStore, TickerStreamSource};
use movers_registry::{DynMarketDataSource, MarketDataClient};
use movers_telemetry::SessionStatsReporter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    scan_loop: ScanLoop,
    feeds: Arc<FeedManager>,
    handle: EngineHandle,
    session_stats: SessionStatsReporter,
}

impl Application {
    /// Create the application with the venue's REST and WebSocket endpoints.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let source = Arc::new(MarketDataClient::with_timeout(
            config.rest_url.clone(),
            config.scanner.kline_interval_min,
            config.request_timeout(),
        )?);
        let streams = Arc::new(TickerStreamSource::new(config.stream_config()));
        Ok(Self::with_sources(config, source, streams))
    }

    /// Create the application on top of the given sources.
    pub fn with_sources(
        config: AppConfig,
        source: DynMarketDataSource,
        streams: DynPriceStreamSource,
    ) -> Self {
        let store = Arc::new(MoverStore::new());
        let feeds = Arc::new(FeedManager::with_stop_grace(
            streams,
            store.clone(),
            config.stop_grace(),
        ));
        let scan_loop = ScanLoop::new(
            source,
            feeds.clone(),
            store,
            ScanSettings::from_config(&config),
        );
        let handle = scan_loop.handle();

        Self {
            config,
            scan_loop,
            feeds,
            handle,
            session_stats: SessionStatsReporter::new(),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    signal.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
        });
        self.run_until(shutdown).await
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run_until(self, shutdown: CancellationToken) -> AppResult<()> {
        let Self {
            config,
            scan_loop,
            feeds,
            handle,
            session_stats,
        } = self;

        info!(
            rest_url = %config.rest_url,
            ws_base_url = %config.ws_base_url,
            segments = ?config.segments,
            threshold_pct = %config.scanner.threshold_pct,
            "Starting application"
        );

        let mut loop_task = tokio::spawn(scan_loop.run(shutdown.clone()));

        let every = Duration::from_secs(config.telemetry.summary_interval_secs);
        let mut summary_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        summary_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let joined = loop {
            tokio::select! {
                () = shutdown.cancelled() => break (&mut loop_task).await,
                joined = &mut loop_task => break joined,
                _ = summary_interval.tick() => {
                    log_summary(&handle);
                    session_stats.output_summary();
                }
            }
        };

        // no-op unless the scan loop ended abnormally
        feeds.stop_all().await;

        info!("Final summary:");
        log_summary(&handle);
        session_stats.output_summary();

        joined?;
        info!("Shutdown complete");
        Ok(())
    }
}

fn log_summary(handle: &EngineHandle) {
    MoverSummary::build(&handle.status(), &handle.snapshot(), Utc::now(), DEFAULT_TOP_N).log();
}

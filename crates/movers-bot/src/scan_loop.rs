//! Scan loop.
//!
//! One task cycles Enumerating → Scanning → Diffing → Sleeping. Each
//! completed scan yields a fresh mover set which is diffed against the
//! previous one: entrants open an episode and get a live feed, leavers have
//! their episode closed and their feed stopped, retained movers update
//! their extreme change.

use crate::config::AppConfig;
use futures_util::future::join_all;
use movers_core::{
    Clock, CoreError, InstrumentKey, ScanPhase, ScanStatus, Segment, SystemClock,
};
use movers_detector::{ChangeScanner, ScanOutcome, ScannerConfig};
use movers_feed::{FeedManager, MoverSnapshot, MoverStore, UpsertOutcome};
use movers_registry::DynMarketDataSource;
use movers_telemetry::Metrics;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read access to the engine plus the threshold knob.
///
/// Cheap to clone; every clone observes the same engine.
#[derive(Clone)]
pub struct EngineHandle {
    status: Arc<RwLock<ScanStatus>>,
    store: Arc<MoverStore>,
    threshold: Arc<RwLock<Decimal>>,
}

impl EngineHandle {
    fn new(store: Arc<MoverStore>, threshold: Decimal) -> Self {
        Self {
            status: Arc::new(RwLock::new(ScanStatus::default())),
            store,
            threshold: Arc::new(RwLock::new(threshold)),
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status.read().clone()
    }

    pub fn snapshot(&self) -> MoverSnapshot {
        self.store.snapshot()
    }

    /// Replace the qualification threshold. Takes effect with the next scan.
    pub fn set_threshold(&self, pct: Decimal) -> movers_core::Result<()> {
        if pct <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(format!(
                "threshold must be positive, got {pct}"
            )));
        }
        *self.threshold.write() = pct;
        Metrics::threshold(pct.to_f64().unwrap_or_default());
        self.update_status(|s| {
            s.message = format!("Threshold changed to {pct}%, awaiting next scan");
        });
        info!(threshold_pct = %pct, "Threshold updated");
        Ok(())
    }

    pub fn threshold(&self) -> Decimal {
        *self.threshold.read()
    }

    fn update_status(&self, f: impl FnOnce(&mut ScanStatus)) {
        f(&mut self.status.write());
    }
}

/// Scan loop settings.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub segments: Vec<Segment>,
    pub scanner: ScannerConfig,
    pub scan_interval: Duration,
    pub enumeration_cooldown: Duration,
    /// None keeps closed episodes forever.
    pub archive_retention: Option<chrono::Duration>,
}

impl ScanSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let retention_secs = config.store.archive_retention_secs;
        Self {
            segments: config.segments.clone(),
            scanner: config.scanner.clone(),
            scan_interval: Duration::from_secs(config.scan_loop.scan_interval_secs),
            enumeration_cooldown: Duration::from_secs(config.scan_loop.enumeration_cooldown_secs),
            archive_retention: (retention_secs > 0)
                .then(|| chrono::Duration::from_std(Duration::from_secs(retention_secs)).ok())
                .flatten(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub universe_size: usize,
    pub scanned: usize,
    pub failed: usize,
    pub unavailable: usize,
    pub entered: Vec<InstrumentKey>,
    pub left: Vec<InstrumentKey>,
    pub retained: usize,
    /// Retained movers whose feed had ended and was started again.
    pub restarted: usize,
    /// Closed episodes dropped by retention.
    pub pruned: usize,
}

/// Result of `ScanLoop::run_cycle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Universe listing failed; the cycle was abandoned.
    EnumerationFailed(String),
}

/// Scan loop.
pub struct ScanLoop {
    source: DynMarketDataSource,
    scanner: ChangeScanner,
    feeds: Arc<FeedManager>,
    store: Arc<MoverStore>,
    settings: ScanSettings,
    handle: EngineHandle,
    clock: Arc<dyn Clock>,
    /// Mover set of the last completed scan.
    active: BTreeSet<InstrumentKey>,
    cycle: u64,
}

impl ScanLoop {
    pub fn new(
        source: DynMarketDataSource,
        feeds: Arc<FeedManager>,
        store: Arc<MoverStore>,
        settings: ScanSettings,
    ) -> Self {
        let scanner = ChangeScanner::new(source.clone(), &settings.scanner);
        let handle = EngineHandle::new(store.clone(), settings.scanner.threshold_pct);
        Metrics::threshold(settings.scanner.threshold_pct.to_f64().unwrap_or_default());
        Self {
            source,
            scanner,
            feeds,
            store,
            settings,
            handle,
            clock: Arc::new(SystemClock),
            active: BTreeSet::new(),
            cycle: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Mover set of the last completed scan.
    pub fn active_set(&self) -> &BTreeSet<InstrumentKey> {
        &self.active
    }

    /// Run one pass and return its outcome with the delay before the next.
    pub async fn run_cycle(&mut self) -> (CycleOutcome, Duration) {
        let started = tokio::time::Instant::now();

        self.handle.update_status(|s| {
            s.phase = ScanPhase::Enumerating;
            s.message = "Listing instruments".to_string();
        });
        let universe = match self.source.list_universe(&self.settings.segments).await {
            Ok(universe) => universe,
            Err(e) => {
                let error = e.to_string();
                let cooldown = self.settings.enumeration_cooldown;
                warn!(error = %error, cooldown_secs = cooldown.as_secs(), "Universe enumeration failed");
                Metrics::enumeration_failed();
                self.handle.update_status(|s| {
                    s.phase = ScanPhase::EnumerationFailed;
                    s.message = format!("Enumeration failed, retrying in {}s", cooldown.as_secs());
                    s.last_error = Some(error.clone());
                });
                return (CycleOutcome::EnumerationFailed(error), cooldown);
            }
        };
        Metrics::universe_size(universe.len());

        let threshold = self.handle.threshold();
        self.handle.update_status(|s| {
            s.phase = ScanPhase::Scanning;
            s.message = format!("Scanning {} instruments", universe.len());
            s.universe_size = universe.len();
            s.last_error = None;
        });
        let outcome = self.scanner.scan(&universe, threshold).await;

        self.handle.update_status(|s| {
            s.phase = ScanPhase::Diffing;
            s.message = format!("{} qualifying instruments", outcome.qualifying.len());
        });
        let mut report = self.apply(&outcome).await;
        report.universe_size = universe.len();
        report.scanned = outcome.scanned;
        report.failed = outcome.failed;
        report.unavailable = outcome.unavailable;

        let now = self.clock.now();
        let cutoff = self
            .settings
            .archive_retention
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            report.pruned = self.store.prune_archived(cutoff);
            if report.pruned > 0 {
                debug!(pruned = report.pruned, "Pruned archived episodes");
            }
        }

        self.cycle += 1;
        let interval = self.settings.scan_interval;
        let (cycle, active_count) = (self.cycle, self.active.len());
        self.handle.update_status(|s| {
            s.phase = ScanPhase::Sleeping;
            s.message = format!("Next scan in {}s", interval.as_secs());
            s.last_scan_at = Some(now);
            s.active_count = active_count;
            s.cycle = cycle;
        });

        Metrics::scan_completed(started.elapsed().as_secs_f64());
        Metrics::active_movers(active_count);
        info!(
            cycle,
            universe = report.universe_size,
            active = active_count,
            entered = report.entered.len(),
            left = report.left.len(),
            failed = report.failed,
            "Scan cycle complete"
        );

        (CycleOutcome::Completed(report), interval)
    }

    /// Diff the qualifying set against the previous mover set.
    async fn apply(&mut self, outcome: &ScanOutcome) -> CycleReport {
        let now = self.clock.now();
        let next: BTreeSet<InstrumentKey> = outcome.qualifying.keys().cloned().collect();
        let mut report = CycleReport::default();

        report.left = self.active.difference(&next).cloned().collect();
        for key in &report.left {
            self.store.close_episode(key, now);
            Metrics::mover_left(key.segment.category());
            info!(%key, "Mover left");
        }
        join_all(report.left.iter().map(|key| self.feeds.stop(key))).await;

        for (key, q) in &outcome.qualifying {
            match self.store.upsert_on_qualify(key, q.change_pct, q.last_close, now) {
                UpsertOutcome::Entered => {
                    Metrics::mover_entered(key.segment.category());
                    info!(
                        %key,
                        change_pct = %q.change_pct.round_dp(2),
                        entry_price = %q.last_close,
                        "Mover entered"
                    );
                    self.feeds.start(key);
                    report.entered.push(key.clone());
                }
                UpsertOutcome::Raised | UpsertOutcome::Unchanged => {
                    report.retained += 1;
                    if !self.feeds.is_running(key) && self.feeds.start(key) {
                        debug!(%key, "Restarted ended live feed");
                        report.restarted += 1;
                    }
                }
            }
        }
        report.entered.sort();

        self.active = next;
        report
    }

    /// Cycle until `shutdown` fires, then stop every feed.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            segments = ?self.settings.segments,
            threshold_pct = %self.handle.threshold(),
            interval_secs = self.settings.scan_interval.as_secs(),
            "Scan loop started"
        );

        loop {
            let delay = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                (_, delay) = self.run_cycle() => delay,
            };
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.handle.update_status(|s| {
            s.phase = ScanPhase::Stopped;
            s.message = "Stopped".to_string();
        });
        self.feeds.stop_all().await;
        info!("Scan loop stopped");
    }
}

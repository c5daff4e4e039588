//! Periodic mover summary log.

use chrono::{DateTime, Utc};
use movers_core::{Price, ScanPhase, ScanStatus};
use movers_feed::{MoverSnapshot, MoverView};
use rust_decimal::Decimal;
use tracing::info;

/// Active movers listed per summary.
pub const DEFAULT_TOP_N: usize = 10;

/// One active mover in a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MoverLine {
    pub key: String,
    pub max_change_pct: Decimal,
    pub entry_price: Price,
    pub last_price: Option<Price>,
    pub since_entry_pct: Option<Decimal>,
    /// Seconds since the episode opened.
    pub age_secs: i64,
}

impl MoverLine {
    fn from_view(view: &MoverView, now: DateTime<Utc>) -> Self {
        Self {
            key: view.key.to_string(),
            max_change_pct: view.record.max_abs_change_pct.round_dp(2),
            entry_price: view.record.entry_price,
            last_price: view.latest_price.map(|sample| sample.price),
            since_entry_pct: view.change_since_entry_pct.map(|pct| pct.round_dp(2)),
            age_secs: (now - view.record.entered_at).num_seconds().max(0),
        }
    }
}

/// Engine state condensed for one log burst.
#[derive(Debug, Clone, PartialEq)]
pub struct MoverSummary {
    pub phase: ScanPhase,
    pub cycle: u64,
    pub universe_size: usize,
    pub active: usize,
    pub archived: usize,
    pub last_error: Option<String>,
    /// Largest movers first.
    pub top: Vec<MoverLine>,
}

impl MoverSummary {
    pub fn build(
        status: &ScanStatus,
        snapshot: &MoverSnapshot,
        now: DateTime<Utc>,
        top_n: usize,
    ) -> Self {
        Self {
            phase: status.phase,
            cycle: status.cycle,
            universe_size: status.universe_size,
            active: snapshot.active.len(),
            archived: snapshot.archived.len(),
            last_error: status.last_error.clone(),
            top: snapshot
                .active
                .iter()
                .take(top_n)
                .map(|view| MoverLine::from_view(view, now))
                .collect(),
        }
    }

    pub fn log(&self) {
        info!(
            phase = %self.phase,
            cycle = self.cycle,
            universe = self.universe_size,
            active = self.active,
            archived = self.archived,
            last_error = self.last_error.as_deref().unwrap_or("-"),
            "Mover summary"
        );
        for (rank, line) in self.top.iter().enumerate() {
            info!(
                rank = rank + 1,
                key = %line.key,
                max_change_pct = %line.max_change_pct,
                entry_price = %line.entry_price,
                last_price = %line.last_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                since_entry_pct = %line.since_entry_pct.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                age_secs = line.age_secs,
                "Active mover"
            );
        }
    }
}

//! Mover state store.
//!
//! Keeps, per instrument, the latest mover episode and the latest live
//! price. The scan loop drives membership (`upsert_on_qualify`,
//! `close_episode`) and the feed tasks drive prices (`record_price`).
//! Each instrument has its own lock; there is no store-wide lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use movers_core::{InstrumentKey, MoverRecord, Price, PriceSample};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Per-instrument state container.
#[derive(Debug, Default)]
struct MoverEntry {
    /// Latest episode. Re-entry replaces a closed one.
    episode: Option<MoverRecord>,
    latest: Option<PriceSample>,
}

type StoreEntry = Arc<RwLock<MoverEntry>>;

/// Effect of `upsert_on_qualify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new episode was opened.
    Entered,
    /// The active episode's extreme change grew.
    Raised,
    Unchanged,
}

/// Consistent view of one instrument, read under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct MoverView {
    pub key: InstrumentKey,
    pub record: MoverRecord,
    pub latest_price: Option<PriceSample>,
    /// Change of the latest price relative to the entry price.
    pub change_since_entry_pct: Option<Decimal>,
}

/// Point-in-time copy of all episodes.
///
/// Active views are sorted by extreme change magnitude (largest first),
/// archived views by `left_at` (most recent first).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoverSnapshot {
    pub active: Vec<MoverView>,
    pub archived: Vec<MoverView>,
}

/// Mover state store.
pub struct MoverStore {
    entries: DashMap<InstrumentKey, StoreEntry>,
}

impl MoverStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Get or create an entry. The map guard is released before returning.
    fn get_or_create(&self, key: &InstrumentKey) -> StoreEntry {
        if let Some(entry) = self.entries.get(key) {
            return entry.clone();
        }
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(MoverEntry::default())))
            .clone()
    }

    fn get(&self, key: &InstrumentKey) -> Option<StoreEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Record that `key` qualifies with `change_pct` at `price`.
    ///
    /// Opens an episode if none is active, otherwise raises the extreme
    /// change when the new magnitude is larger.
    pub fn upsert_on_qualify(
        &self,
        key: &InstrumentKey,
        change_pct: Decimal,
        price: Price,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        let entry = self.get_or_create(key);
        let mut guard = entry.write();

        match guard.episode.as_mut() {
            Some(record) if record.is_active() => {
                if record.observe_change(change_pct) {
                    debug!(%key, change_pct = %change_pct, "Mover extreme raised");
                    UpsertOutcome::Raised
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            _ => {
                guard.episode = Some(MoverRecord::open(now, change_pct, price));
                UpsertOutcome::Entered
            }
        }
    }

    /// Close the active episode of `key`.
    ///
    /// Returns false if there is no active episode.
    pub fn close_episode(&self, key: &InstrumentKey, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.get(key) else {
            return false;
        };
        let mut guard = entry.write();
        guard
            .episode
            .as_mut()
            .map(|record| record.close(now))
            .unwrap_or(false)
    }

    /// Store the latest price of `key`.
    ///
    /// Ticks older than the stored sample are discarded (returns false).
    /// Keys without an episode are accepted.
    pub fn record_price(&self, key: &InstrumentKey, price: Price, observed_at: DateTime<Utc>) -> bool {
        let entry = self.get_or_create(key);
        let mut guard = entry.write();

        if let Some(prev) = guard.latest {
            if observed_at < prev.observed_at {
                return false;
            }
        }
        guard.latest = Some(PriceSample::new(price, observed_at));
        true
    }

    /// Copy every episode together with its latest price.
    pub fn snapshot(&self) -> MoverSnapshot {
        let mut snapshot = MoverSnapshot::default();

        for item in self.entries.iter() {
            let guard = item.value().read();
            let Some(record) = guard.episode else {
                continue;
            };
            let view = MoverView {
                key: item.key().clone(),
                record,
                latest_price: guard.latest,
                change_since_entry_pct: guard
                    .latest
                    .and_then(|sample| record.change_since_entry_pct(sample.price)),
            };
            if record.is_active() {
                snapshot.active.push(view);
            } else {
                snapshot.archived.push(view);
            }
        }

        snapshot.active.sort_by(|a, b| {
            b.record
                .max_abs_change_pct
                .abs()
                .cmp(&a.record.max_abs_change_pct.abs())
                .then_with(|| a.key.cmp(&b.key))
        });
        snapshot.archived.sort_by(|a, b| {
            b.record
                .left_at
                .cmp(&a.record.left_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        snapshot
    }

    /// Latest episode of `key`, active or closed.
    pub fn episode(&self, key: &InstrumentKey) -> Option<MoverRecord> {
        self.get(key).and_then(|entry| entry.read().episode)
    }

    pub fn latest_price(&self, key: &InstrumentKey) -> Option<PriceSample> {
        self.get(key).and_then(|entry| entry.read().latest)
    }

    /// Keys with an active episode.
    pub fn active_keys(&self) -> BTreeSet<InstrumentKey> {
        self.entries
            .iter()
            .filter(|item| {
                item.value()
                    .read()
                    .episode
                    .map(|record| record.is_active())
                    .unwrap_or(false)
            })
            .map(|item| item.key().clone())
            .collect()
    }

    /// Number of tracked instruments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop closed episodes that left before `cutoff`, together with their
    /// price samples. Entries that only hold a price older than `cutoff`
    /// are dropped as well.
    ///
    /// Returns the number of removed instruments.
    pub fn prune_archived(&self, cutoff: DateTime<Utc>) -> usize {
        let is_stale = |entry: &StoreEntry| {
            let guard = entry.read();
            match guard.episode {
                Some(record) => record.left_at.map(|left| left < cutoff).unwrap_or(false),
                None => guard
                    .latest
                    .map(|sample| sample.observed_at < cutoff)
                    .unwrap_or(true),
            }
        };

        let stale: Vec<InstrumentKey> = self
            .entries
            .iter()
            .filter(|item| is_stale(item.value()))
            .map(|item| item.key().clone())
            .collect();

        // Re-checked under the shard lock: a re-entry may have raced the scan above.
        stale
            .iter()
            .filter(|key| self.entries.remove_if(*key, |_, entry| is_stale(entry)).is_some())
            .count()
    }
}

impl Default for MoverStore {
    fn default() -> Self {
        Self::new()
    }
}

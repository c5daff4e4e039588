//! Live feed manager.
//!
//! Owns one feed task per active mover. A feed task opens a price stream
//! for its instrument and writes every tick into the store until it is
//! stopped or the stream ends. Feeds are never restarted here; the scan
//! loop calls `start` again while the instrument is still a mover.

use crate::store::MoverStore;
use crate::stream::DynPriceStreamSource;
use futures_util::future::join_all;
use movers_core::InstrumentKey;
use movers_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time a stopped feed gets to release its connection.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Registry entry of a running feed.
struct FeedHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live feed manager.
pub struct FeedManager {
    source: DynPriceStreamSource,
    store: Arc<MoverStore>,
    feeds: Mutex<HashMap<InstrumentKey, FeedHandle>>,
    stop_grace: Duration,
}

impl FeedManager {
    pub fn new(source: DynPriceStreamSource, store: Arc<MoverStore>) -> Self {
        Self::with_stop_grace(source, store, DEFAULT_STOP_GRACE)
    }

    pub fn with_stop_grace(
        source: DynPriceStreamSource,
        store: Arc<MoverStore>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            source,
            store,
            feeds: Mutex::new(HashMap::new()),
            stop_grace,
        }
    }

    /// Start the feed of `key`.
    ///
    /// No-op if a feed for `key` is still running; a finished one is
    /// replaced. Returns true if a new task was spawned.
    pub fn start(&self, key: &InstrumentKey) -> bool {
        let mut feeds = self.feeds.lock();
        if let Some(handle) = feeds.get(key) {
            if !handle.task.is_finished() {
                return false;
            }
            debug!(%key, "Replacing finished feed");
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_feed(
            self.source.clone(),
            self.store.clone(),
            key.clone(),
            cancel.clone(),
        ));
        feeds.insert(key.clone(), FeedHandle { cancel, task });
        Metrics::feeds_running(feeds.len());
        info!(%key, "Live feed started");
        true
    }

    /// Stop the feed of `key` and wait until it has finished.
    ///
    /// The task gets the grace period to close its stream before it is
    /// aborted. Once this returns the feed records no further prices.
    /// Returns false if no feed was registered.
    pub async fn stop(&self, key: &InstrumentKey) -> bool {
        let handle = {
            let mut feeds = self.feeds.lock();
            let handle = feeds.remove(key);
            Metrics::feeds_running(feeds.len());
            handle
        };
        let Some(handle) = handle else {
            return false;
        };

        handle.cancel.cancel();
        self.join(key, handle.task).await;
        info!(%key, "Live feed stopped");
        true
    }

    /// Stop every feed.
    pub async fn stop_all(&self) {
        let handles: Vec<(InstrumentKey, FeedHandle)> = {
            let mut feeds = self.feeds.lock();
            let drained = feeds.drain().collect();
            Metrics::feeds_running(0);
            drained
        };
        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        join_all(
            handles
                .into_iter()
                .map(|(key, handle)| async move { self.join(&key, handle.task).await }),
        )
        .await;
        info!(count, "All live feeds stopped");
    }

    async fn join(&self, key: &InstrumentKey, mut task: JoinHandle<()>) {
        if tokio::time::timeout(self.stop_grace, &mut task).await.is_err() {
            warn!(%key, grace_ms = self.stop_grace.as_millis() as u64, "Feed did not stop in time, aborting");
            task.abort();
            let _ = task.await;
        }
    }

    /// Whether a feed task for `key` is registered and still running.
    pub fn is_running(&self, key: &InstrumentKey) -> bool {
        self.feeds
            .lock()
            .get(key)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Number of feed tasks still running.
    pub fn running_count(&self) -> usize {
        self.feeds
            .lock()
            .values()
            .filter(|handle| !handle.task.is_finished())
            .count()
    }
}

/// Feed task body.
async fn run_feed(
    source: DynPriceStreamSource,
    store: Arc<MoverStore>,
    key: InstrumentKey,
    cancel: CancellationToken,
) {
    let mut stream = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            Metrics::feed_terminated("stopped");
            return;
        }
        opened = source.open(&key) => match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%key, error = %e, "Failed to open live feed");
                Metrics::feed_terminated("open_failed");
                return;
            }
        },
    };

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                stream.close().await;
                Metrics::feed_terminated("stopped");
                debug!(%key, "Live feed cancelled");
                return;
            }
            tick = stream.next() => match tick {
                Some(tick) => {
                    if store.record_price(&key, tick.price, tick.observed_at) {
                        Metrics::tick_recorded();
                    } else {
                        Metrics::tick_out_of_order();
                        debug!(%key, observed_at = %tick.observed_at, "Discarding out-of-order tick");
                    }
                }
                None => {
                    match stream.finish().await {
                        Ok(()) => {
                            debug!(%key, "Live feed stream ended");
                            Metrics::feed_terminated("stream_ended");
                        }
                        Err(e) => {
                            warn!(%key, error = %e, "Live feed stream failed");
                            Metrics::feed_terminated("stream_error");
                        }
                    }
                    return;
                }
            },
        }
    }
}

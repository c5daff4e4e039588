//! Live price streams.
//!
//! `PriceStreamSource` opens one subscription per instrument. The
//! production source connects a ticker WebSocket per instrument and turns
//! its pushes into `PriceTick`s; `MockPriceSource` hands out channel-backed
//! streams that tests feed directly.

use crate::error::{FeedError, FeedResult};
use crate::parser::parse_ticker;
use movers_core::{Clock, InstrumentKey, PriceTick, Segment, SystemClock};
use movers_telemetry::Metrics;
use movers_ws::{ConnectionConfig, TickerConnection, TopicMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opens live price subscriptions.
pub trait PriceStreamSource: Send + Sync {
    /// Open a subscription for `key`.
    ///
    /// Resolves once the subscription is established.
    fn open<'a>(&'a self, key: &'a InstrumentKey) -> BoxFuture<'a, FeedResult<PriceStream>>;
}

/// Arc wrapper for PriceStreamSource trait objects.
pub type DynPriceStreamSource = Arc<dyn PriceStreamSource>;

/// An open price subscription.
///
/// Dropping the stream cancels its producer; `close` additionally waits
/// for the producer to release the connection. Once `next` returns None,
/// `finish` tells a clean end from a failed connection.
pub struct PriceStream {
    ticks: mpsc::Receiver<PriceTick>,
    cancel: CancellationToken,
    task: Option<JoinHandle<FeedResult<()>>>,
}

impl PriceStream {
    /// Stream fed by a producer task that honours `cancel`.
    pub fn new(
        ticks: mpsc::Receiver<PriceTick>,
        cancel: CancellationToken,
        task: JoinHandle<FeedResult<()>>,
    ) -> Self {
        Self {
            ticks,
            cancel,
            task: Some(task),
        }
    }

    /// Stream fed directly through a channel.
    pub fn from_channel(ticks: mpsc::Receiver<PriceTick>) -> Self {
        Self {
            ticks,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Next tick, or None once the subscription has ended.
    pub async fn next(&mut self) -> Option<PriceTick> {
        self.ticks.recv().await
    }

    /// Close the subscription and wait for the producer to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.ticks.close();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Price stream ended with error while closing"),
                Err(e) => debug!(error = %e, "Price stream producer ended abnormally"),
            }
        }
    }

    /// Wait for the producer and return how the subscription ended.
    pub async fn finish(mut self) -> FeedResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await
            .map_err(|e| FeedError::Stream(format!("producer task: {e}")))?
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Settings of the WebSocket-backed source.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Public stream base URL; the segment category is appended.
    pub ws_base_url: String,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Buffer between the socket reader and the consumer.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "wss://stream.bybit.com/v5/public".to_string(),
            ping_interval_ms: 20_000,
            pong_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            channel_capacity: 256,
        }
    }
}

impl StreamConfig {
    /// Stream URL for one segment (e.g., ".../v5/public/linear").
    pub fn url_for(&self, segment: Segment) -> String {
        format!(
            "{}/{}",
            self.ws_base_url.trim_end_matches('/'),
            segment.category()
        )
    }
}

/// Ticker WebSocket source: one connection per instrument.
pub struct TickerStreamSource {
    config: StreamConfig,
    clock: Arc<dyn Clock>,
}

impl TickerStreamSource {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn connect(&self, key: &InstrumentKey) -> FeedResult<PriceStream> {
        let topic = key.ticker_topic();
        let connection = TickerConnection::connect(ConnectionConfig {
            url: self.config.url_for(key.segment),
            topic: topic.clone(),
            ping_interval_ms: self.config.ping_interval_ms,
            pong_timeout_ms: self.config.pong_timeout_ms,
            connect_timeout_ms: self.config.connect_timeout_ms,
        })
        .await?;

        let capacity = self.config.channel_capacity.max(1);
        let (tick_tx, tick_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump_ticks(
            connection,
            key.clone(),
            topic,
            tick_tx,
            cancel.clone(),
            self.clock.clone(),
            capacity,
        ));

        debug!(%key, "Ticker stream opened");
        Ok(PriceStream::new(tick_rx, cancel, task))
    }
}

impl PriceStreamSource for TickerStreamSource {
    fn open<'a>(&'a self, key: &'a InstrumentKey) -> BoxFuture<'a, FeedResult<PriceStream>> {
        Box::pin(self.connect(key))
    }
}

/// Drive the connection and convert its pushes into ticks until the
/// connection ends. Unparseable pushes are dropped.
///
/// Returns the connection error, if any.
async fn pump_ticks(
    connection: TickerConnection,
    key: InstrumentKey,
    topic: String,
    tick_tx: mpsc::Sender<PriceTick>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    capacity: usize,
) -> FeedResult<()> {
    let (msg_tx, mut msg_rx) = mpsc::channel::<TopicMessage>(capacity);
    let run = connection.run(msg_tx, cancel.clone());
    tokio::pin!(run);

    loop {
        tokio::select! {
            result = &mut run => {
                return match result {
                    Ok(()) => {
                        debug!(%key, "Ticker connection finished");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(%key, error = %e, "Ticker connection terminated");
                        Err(e.into())
                    }
                };
            }
            Some(msg) = msg_rx.recv() => {
                match parse_ticker(&msg, &topic, clock.now()) {
                    Ok(tick) => {
                        if tick_tx.send(tick).await.is_err() {
                            cancel.cancel();
                        }
                    }
                    Err(FeedError::MissingPrice(_)) => {}
                    Err(e) => {
                        Metrics::tick_dropped();
                        debug!(%key, error = %e, "Dropping ticker message");
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockSourceState {
    senders: HashMap<InstrumentKey, mpsc::Sender<PriceTick>>,
    failures: HashMap<InstrumentKey, oneshot::Sender<FeedError>>,
    opened: Vec<InstrumentKey>,
    failing: HashSet<InstrumentKey>,
}

/// Channel-backed price source for testing.
#[derive(Debug, Default)]
pub struct MockPriceSource {
    state: Mutex<MockSourceState>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for `key`.
    pub fn fail_open(&self, key: &InstrumentKey) {
        self.state.lock().failing.insert(key.clone());
    }

    /// Deliver a tick to the open stream of `key`.
    ///
    /// Returns false if no stream is open or its consumer is gone.
    pub fn push(&self, key: &InstrumentKey, tick: PriceTick) -> bool {
        let sender = self.state.lock().senders.get(key).cloned();
        sender.map(|tx| tx.try_send(tick).is_ok()).unwrap_or(false)
    }

    /// End the stream of `key` from the producer side.
    pub fn end_stream(&self, key: &InstrumentKey) {
        let mut state = self.state.lock();
        state.senders.remove(key);
        state.failures.remove(key);
    }

    /// End the stream of `key` with a connection error.
    pub fn fail_stream(&self, key: &InstrumentKey, reason: &str) {
        let mut state = self.state.lock();
        if let Some(failure) = state.failures.remove(key) {
            let _ = failure.send(FeedError::Stream(reason.to_string()));
        }
        state.senders.remove(key);
    }

    /// Whether a consumer currently holds an open stream for `key`.
    pub fn is_open(&self, key: &InstrumentKey) -> bool {
        self.state
            .lock()
            .senders
            .get(key)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Every `open` call, in order.
    pub fn opened(&self) -> Vec<InstrumentKey> {
        self.state.lock().opened.clone()
    }

    pub fn open_count(&self, key: &InstrumentKey) -> usize {
        self.state.lock().opened.iter().filter(|k| *k == key).count()
    }
}

impl PriceStreamSource for MockPriceSource {
    fn open<'a>(&'a self, key: &'a InstrumentKey) -> BoxFuture<'a, FeedResult<PriceStream>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.opened.push(key.clone());
            if state.failing.contains(key) {
                return Err(FeedError::Stream(format!("mock: cannot open {key}")));
            }
            let (tx, rx) = mpsc::channel(64);
            let (failure_tx, failure_rx) = oneshot::channel();
            state.senders.insert(key.clone(), tx);
            state.failures.insert(key.clone(), failure_tx);

            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let task = tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => Ok(()),
                    failure = failure_rx => match failure {
                        Ok(e) => Err(e),
                        Err(_) => Ok(()),
                    },
                }
            });
            Ok(PriceStream::new(rx, cancel, task))
        })
    }
}

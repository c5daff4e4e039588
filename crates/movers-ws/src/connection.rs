//! Single-topic ticker connection.
//!
//! Handles the lifecycle of one public stream connection: connect, subscribe
//! to one topic, forward its pushes, keep the connection alive with pings and
//! close it when cancelled. There is no reconnection: a connection that ends
//! stays ended and the owner decides whether to open a new one.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{OpResponse, TopicMessage, WsMessage, WsRequest};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL (e.g., "wss://stream.bybit.com/v5/public/linear").
    pub url: String,
    /// Topic to subscribe to (e.g., "tickers.BTCUSDT").
    pub topic: String,
    /// Ping interval.
    pub ping_interval_ms: u64,
    /// Pong must arrive within this.
    pub pong_timeout_ms: u64,
    /// Handshake timeout.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            topic: String::new(),
            ping_interval_ms: 20_000,
            pong_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// Subscribe request sent, acknowledgement pending.
    Subscribing,
    /// Subscription acknowledged.
    Streaming,
    Closed,
}

/// What the message loop should do after handling a frame.
enum Flow {
    Continue,
    Stop,
}

/// Connected ticker stream for one topic.
pub struct TickerConnection {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    heartbeat: HeartbeatManager,
    stream: WsStream,
}

impl TickerConnection {
    /// Connect and send the subscribe request.
    pub async fn connect(config: ConnectionConfig) -> WsResult<Self> {
        let state = RwLock::new(ConnectionState::Connecting);
        debug!(url = %config.url, topic = %config.topic, "Connecting ticker stream");

        // TCP_NODELAY: ticks are small and latency matters more than throughput
        let handshake = connect_async_tls_with_config(&config.url, None, true, None);
        let (mut stream, _response) =
            tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), handshake)
                .await
                .map_err(|_| {
                    WsError::ConnectionFailed(format!(
                        "handshake timed out after {}ms",
                        config.connect_timeout_ms
                    ))
                })??;

        let request = WsRequest::subscribe(vec![config.topic.clone()]);
        stream
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;
        *state.write() = ConnectionState::Subscribing;

        let heartbeat = HeartbeatManager::new(config.ping_interval_ms, config.pong_timeout_ms);

        Ok(Self {
            config,
            state,
            heartbeat,
            stream,
        })
    }

    /// Run the message loop until cancelled, the server closes the stream,
    /// or the receiver of `message_tx` is dropped.
    ///
    /// Returns `Ok(())` on cancellation, receiver drop or a clean end of stream.
    pub async fn run(
        self,
        message_tx: mpsc::Sender<TopicMessage>,
        cancel: CancellationToken,
    ) -> WsResult<()> {
        let Self {
            config,
            state,
            heartbeat,
            stream,
        } = self;
        let (mut write, mut read) = stream.split();

        heartbeat.reset();
        let mut check = tokio::time::interval(heartbeat.check_interval());
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(topic = %config.topic, "Cancellation received, closing ticker stream");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame");
                    }
                    break Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_message();
                            match handle_text(&config, &state, &heartbeat, &text, &message_tx).await {
                                Ok(Flow::Continue) => {}
                                Ok(Flow::Stop) => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break Ok(());
                                }
                                Err(e) => break Err(e),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            debug!(topic = %config.topic, code, %reason, "Ticker stream closed by server");
                            break Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            break Err(e.into());
                        }
                        None => {
                            debug!(topic = %config.topic, "Ticker stream ended");
                            break Ok(());
                        }
                        _ => {}
                    }
                }

                _ = check.tick() => {
                    if heartbeat.is_timed_out() {
                        warn!(topic = %config.topic, "Heartbeat timeout");
                        break Err(WsError::HeartbeatTimeout);
                    }
                    if heartbeat.should_ping() {
                        let ping = match serde_json::to_string(&WsRequest::ping()) {
                            Ok(ping) => ping,
                            Err(e) => break Err(e.into()),
                        };
                        if let Err(e) = write.send(Message::Text(ping)).await {
                            break Err(e.into());
                        }
                        heartbeat.record_ping();
                    }
                }
            }
        };

        let last = std::mem::replace(&mut *state.write(), ConnectionState::Closed);
        if last != ConnectionState::Streaming {
            debug!(topic = %config.topic, state = ?last, "Ticker stream ended before subscription was acknowledged");
        }
        result
    }
}

/// Handle one text frame.
///
/// Frames that do not parse, and pushes for other topics, are dropped
/// without ending the connection.
async fn handle_text(
    config: &ConnectionConfig,
    state: &RwLock<ConnectionState>,
    heartbeat: &HeartbeatManager,
    text: &str,
    message_tx: &mpsc::Sender<TopicMessage>,
) -> WsResult<Flow> {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(topic = %config.topic, error = %e, "Dropping malformed message");
            return Ok(Flow::Continue);
        }
    };

    match msg {
        WsMessage::Op(op) => handle_op(config, state, heartbeat, &op),
        WsMessage::Topic(topic_msg) => {
            if topic_msg.topic != config.topic {
                debug!(expected = %config.topic, got = %topic_msg.topic, "Dropping message for other topic");
                return Ok(Flow::Continue);
            }
            if message_tx.send(topic_msg).await.is_err() {
                debug!(topic = %config.topic, "Message receiver dropped");
                return Ok(Flow::Stop);
            }
            Ok(Flow::Continue)
        }
    }
}

fn handle_op(
    config: &ConnectionConfig,
    state: &RwLock<ConnectionState>,
    heartbeat: &HeartbeatManager,
    op: &OpResponse,
) -> WsResult<Flow> {
    if op.is_pong() {
        heartbeat.record_pong();
        return Ok(Flow::Continue);
    }

    if op.is_subscribe_ack() {
        if !op.is_success() {
            let reason = op.ret_msg.clone().unwrap_or_default();
            warn!(topic = %config.topic, %reason, "Subscription rejected");
            return Err(WsError::SubscriptionRejected(format!(
                "{}: {}",
                config.topic, reason
            )));
        }
        info!(topic = %config.topic, conn_id = ?op.conn_id, "Ticker subscription acknowledged");
        *state.write() = ConnectionState::Streaming;
    }

    Ok(Flow::Continue)
}

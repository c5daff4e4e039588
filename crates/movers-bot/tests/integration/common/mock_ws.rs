//! Mock ticker WebSocket server for integration tests.
//!
//! Speaks the venue's public stream protocol:
//! - Acknowledges `subscribe` requests (or rejects configured topics)
//! - Answers `{"op":"ping"}` with the spot pong format
//! - Forwards pushed ticker frames to connections subscribed to the topic
//! - Records request paths, received messages and close frames

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerEvent {
    Push { topic: String, payload: String },
    Disconnect,
}

#[derive(Default)]
struct ServerState {
    paths: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
    /// Subscriber count per topic.
    subscribed: Mutex<HashMap<String, u32>>,
    rejected: Mutex<HashSet<String>>,
    connections: AtomicU32,
    active: AtomicU32,
    close_frames: AtomicU32,
}

/// A mock ticker server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    events: broadcast::Sender<ServerEvent>,
    state: Arc<ServerState>,
}

impl MockWsServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        let (events, _) = broadcast::channel(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let accept_state = state.clone();
        let accept_events = events.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            accept_state.clone(),
                            accept_events.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            events,
            state,
        }
    }

    /// Base URL; clients append the segment path.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Reject subscriptions to `topic`.
    pub fn reject_topic(&self, topic: &str) {
        self.state.rejected.lock().insert(topic.to_string());
    }

    /// Push a ticker snapshot carrying `last_price`.
    pub fn push_ticker(&self, topic: &str, ts_ms: i64, last_price: &str) {
        let symbol = topic.trim_start_matches("tickers.");
        let payload = serde_json::json!({
            "topic": topic,
            "type": "snapshot",
            "ts": ts_ms,
            "cs": 1,
            "data": {"symbol": symbol, "lastPrice": last_price}
        });
        self.push_raw(topic, payload.to_string());
    }

    /// Push an arbitrary frame to subscribers of `topic`.
    pub fn push_raw(&self, topic: &str, payload: String) {
        let _ = self.events.send(ServerEvent::Push {
            topic: topic.to_string(),
            payload,
        });
    }

    /// Close every open connection from the server side.
    pub fn disconnect_all(&self) {
        let _ = self.events.send(ServerEvent::Disconnect);
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.state
            .subscribed
            .lock()
            .get(topic)
            .is_some_and(|count| *count > 0)
    }

    pub fn connection_count(&self) -> u32 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn active_connections(&self) -> u32 {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn close_frames(&self) -> u32 {
        self.state.close_frames.load(Ordering::SeqCst)
    }

    /// Request paths of accepted handshakes.
    pub fn paths(&self) -> Vec<String> {
        self.state.paths.lock().clone()
    }

    /// All received text messages.
    pub fn received_messages(&self) -> Vec<String> {
        self.state.messages.lock().clone()
    }

    /// Wait until `cond` holds or `within` elapses.
    pub async fn wait_for(&self, within: Duration, cond: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if cond(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond(self)
    }

    /// Shutdown the listener.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    mut events: broadcast::Receiver<ServerEvent>,
) {
    state.connections.fetch_add(1, Ordering::SeqCst);

    let paths_state = state.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        paths_state.paths.lock().push(req.uri().path().to_string());
        Ok(resp)
    };
    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    state.active.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();
    let mut topics: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.messages.lock().push(text.to_string());
                    for reply in handle_request(&text, &state, &mut topics) {
                        let _ = write.send(Message::Text(reply)).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    state.close_frames.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Ok(ServerEvent::Push { topic, payload }) => {
                    if topics.contains(&topic) {
                        let _ = write.send(Message::Text(payload)).await;
                    }
                }
                Ok(ServerEvent::Disconnect) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    {
        let mut subscribed = state.subscribed.lock();
        for topic in &topics {
            if let Some(count) = subscribed.get_mut(topic) {
                *count = count.saturating_sub(1);
            }
        }
    }
    state.active.fetch_sub(1, Ordering::SeqCst);
}

/// Replies to one client request.
fn handle_request(text: &str, state: &ServerState, topics: &mut HashSet<String>) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };
    match parsed.get("op").and_then(|op| op.as_str()) {
        Some("subscribe") => {
            let args: Vec<String> = parsed
                .get("args")
                .and_then(|args| args.as_array())
                .map(|args| {
                    args.iter()
                        .filter_map(|a| a.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let rejected: Vec<&String> = {
                let rejected = state.rejected.lock();
                args.iter().filter(|topic| rejected.contains(*topic)).collect()
            };
            if let Some(topic) = rejected.first() {
                return vec![serde_json::json!({
                    "success": false,
                    "ret_msg": format!("error:handler not found,topic:{topic}"),
                    "conn_id": "mock",
                    "req_id": "",
                    "op": "subscribe"
                })
                .to_string()];
            }
            {
                let mut subscribed = state.subscribed.lock();
                for topic in &args {
                    if topics.insert(topic.clone()) {
                        *subscribed.entry(topic.clone()).or_insert(0) += 1;
                    }
                }
            }
            vec![serde_json::json!({
                "success": true,
                "ret_msg": "",
                "conn_id": "mock",
                "req_id": "",
                "op": "subscribe"
            })
            .to_string()]
        }
        Some("ping") => vec![serde_json::json!({
            "success": true,
            "ret_msg": "pong",
            "conn_id": "mock",
            "op": "ping"
        })
        .to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}

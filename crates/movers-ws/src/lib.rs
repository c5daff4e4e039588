//! Public ticker WebSocket client for the movers engine.
//!
//! One connection carries one instrument's ticker topic:
//! - Subscription request and acknowledgement handling
//! - Application-level ping/pong heartbeat (20s ping, pong timeout detection)
//! - Cancellation-aware message loop that closes the socket on shutdown
//! - Channel-based forwarding of topic messages

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;

pub use connection::{ConnectionConfig, TickerConnection};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use message::{OpResponse, TopicMessage, WsMessage, WsRequest};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

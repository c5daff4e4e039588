//! WebSocket message types for the venue's public streams.
//!
//! Outgoing requests are `{"op": ..., "args": [...]}` objects. Incoming
//! frames are either topic pushes (`topic` + `data`) or operation responses
//! (subscribe acknowledgements, pongs).

use serde::{Deserialize, Serialize};

// ============================================================================
// Requests (Outgoing)
// ============================================================================

/// Operation request.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub op: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}

impl WsRequest {
    /// Subscribe to one or more topics.
    pub fn subscribe(topics: Vec<String>) -> Self {
        Self {
            op: "subscribe".to_string(),
            args: topics,
            req_id: None,
        }
    }

    /// Application-level heartbeat.
    pub fn ping() -> Self {
        Self {
            op: "ping".to_string(),
            args: Vec::new(),
            req_id: None,
        }
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// Topic push message.
///
/// Format: `{"topic": "tickers.BTCUSDT", "type": "snapshot", "ts": 1673853746003, "data": {...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    /// "snapshot" or "delta".
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Server timestamp in milliseconds.
    #[serde(default)]
    pub ts: Option<i64>,
    pub data: serde_json::Value,
}

impl TopicMessage {
    /// Partial update carrying only the fields that changed.
    pub fn is_delta(&self) -> bool {
        self.kind.as_deref() == Some("delta")
    }
}

/// Operation response (subscribe ack, pong).
///
/// Spot pong:   `{"success": true, "ret_msg": "pong", "conn_id": "...", "op": "ping"}`
/// Linear pong: `{"req_id": "", "op": "pong", "args": ["1675418560633"], "conn_id": "..."}`
#[derive(Debug, Clone, Deserialize)]
pub struct OpResponse {
    pub op: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub ret_msg: Option<String>,
    #[serde(default)]
    pub conn_id: Option<String>,
}

impl OpResponse {
    /// Check if this is a heartbeat response.
    pub fn is_pong(&self) -> bool {
        self.op == "pong" || (self.op == "ping" && self.ret_msg.as_deref() == Some("pong"))
    }

    /// Check if this is a subscribe acknowledgement.
    pub fn is_subscribe_ack(&self) -> bool {
        self.op == "subscribe"
    }

    /// Whether the operation succeeded. Responses without a flag count as success.
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(true)
    }
}

/// Incoming WebSocket message.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WsMessage {
    Topic(TopicMessage),
    Op(OpResponse),
}

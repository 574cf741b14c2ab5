//! The JSON message envelope exchanged on every connection
//!
//! One JSON object per text frame. `type` is mandatory; the remaining
//! fields are optional and omitted from the wire when absent.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::MessageKind;

/// Normal-closure WebSocket code, used for every policy-driven close.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close reason sent when the idle reaper evicts a silent connection.
pub const REASON_IDLE_TIMEOUT: &str = "Connection timeout";

/// Close reason sent to every connection during graceful shutdown.
pub const REASON_SERVER_SHUTDOWN: &str = "Server shutting down";

/// Close reason sent by a client on deliberate disconnect.
pub const REASON_CLIENT_DISCONNECT: &str = "Client disconnecting";

/// Greeting carried by the `welcome` envelope.
pub const WELCOME_TEXT: &str = "Connected to WebSocket server";

/// Text carried by the `error` envelope sent for undecodable frames.
pub const DECODE_FAILURE_TEXT: &str = "Failed to process message";

/// Decode failure for an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Wire-level message envelope.
///
/// Constructed, serialized, sent and discarded; never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: String,
}

impl Envelope {
    /// Bare envelope of the given kind with a fresh timestamp.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            data: None,
            message: None,
            session_id: None,
            timestamp: now_timestamp(),
        }
    }

    /// `welcome` greeting sent right after a successful accept.
    pub fn welcome(session_id: &str) -> Self {
        Self {
            message: Some(WELCOME_TEXT.to_string()),
            session_id: Some(session_id.to_string()),
            ..Self::new(MessageKind::Welcome)
        }
    }

    /// Client liveness signal.
    pub fn ping() -> Self {
        Self::new(MessageKind::Ping)
    }

    /// Reply to a `ping`.
    pub fn pong() -> Self {
        Self::new(MessageKind::Pong)
    }

    /// Error report back to a single sender.
    pub fn error(message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::new(MessageKind::Error)
        }
    }

    /// Broadcast payload wrapper.
    pub fn message(data: Option<serde_json::Value>) -> Self {
        Self {
            data,
            ..Self::new(MessageKind::Message)
        }
    }

    /// Serialize to a single JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and shape-check one inbound text frame.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Current time as an ISO-8601 string, millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

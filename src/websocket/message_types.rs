//! Wire frames exchanged with clients: one JSON text frame per message,
//! discriminated by a mandatory `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RoomId, UserId};

/// Frame types this router understands. Anything else is reported back as a
/// protocol error without closing the connection.
const KNOWN_TYPES: &[&str] = &["ping", "chat", "typing", "broadcast"];

/// Inbound frames, client to server.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsInboundEvent {
    Ping,
    Chat {
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Typing,
    Broadcast {
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
}

/// Outbound frames, server to client.
///
/// `chat`/`broadcast` carry the client-supplied timestamp through untouched;
/// `system` events are stamped with the server clock.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsOutboundEvent {
    Pong,
    Chat {
        sender: UserId,
        content: String,
        room_id: RoomId,
        timestamp: Option<String>,
    },
    Typing {
        user_id: UserId,
        room_id: RoomId,
    },
    /// Global notice produced by the `broadcast` operation.
    Message {
        sender: UserId,
        content: String,
        timestamp: Option<String>,
    },
    System {
        action: SystemAction,
        user_id: UserId,
        room_id: RoomId,
        timestamp: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemAction {
    Join,
    Leave,
}

/// Why an inbound frame was rejected. Both cases are per-message conditions;
/// the connection stays open.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The payload is not a JSON envelope we can read.
    Malformed,
    /// A well-formed envelope whose `type` this router does not know.
    UnknownType(String),
}

impl FrameError {
    /// The error frame reported back to the offending connection.
    pub fn to_event(&self) -> WsOutboundEvent {
        let message = match self {
            FrameError::Malformed => "invalid JSON payload".to_string(),
            FrameError::UnknownType(kind) => format!("unknown message type: {kind}"),
        };
        WsOutboundEvent::Error { message }
    }
}

/// Decode one text frame into its typed envelope, distinguishing malformed
/// payloads from unrecognized message types.
pub fn decode_frame(raw: &str) -> Result<WsInboundEvent, FrameError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| FrameError::Malformed)?;
    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);

    serde_json::from_value(value).map_err(|_| match kind {
        Some(kind) if !KNOWN_TYPES.contains(&kind.as_str()) => FrameError::UnknownType(kind),
        _ => FrameError::Malformed,
    })
}

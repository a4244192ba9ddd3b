//! Message envelopes and relay frames
//!
//! The `SyncEnvelope` wraps a [`SyncMessage`] with the room and sender it
//! belongs to. The relay delivers it inside a `WireFrame`.
//!
//! ## Wire Format
//!
//! ```text
//! WireFrame (what the relay delivers):
//! {"event": "message", "topic": "namesync-k3v9qa", "message": "<envelope JSON string>"}
//!
//! SyncEnvelope (the `message` string, decoded):
//! {"type": "likes_batch", "roomId": "k3v9qa", "senderId": "01J...", "payload": {...}}
//! ```
//!
//! Frames whose `event` is not `message` (keepalives, open notices) carry
//! no envelope and are skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::sync::protocol::SyncMessage;

/// Relay event name for frames carrying an envelope
pub const MESSAGE_EVENT: &str = "message";

/// A sync message addressed to a room and stamped with its sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEnvelope {
    /// Room code the message belongs to
    pub room_id: String,

    /// Instance identifier of the sender
    pub sender_id: String,

    /// The message itself
    pub message: SyncMessage,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    room_id: String,
    sender_id: String,
    payload: Value,
}

impl SyncEnvelope {
    /// Create a new envelope
    pub fn new(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        message: SyncMessage,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            message,
        }
    }

    /// Encode to the JSON string carried in a frame's `message` field
    pub fn encode(&self) -> Result<String, SyncError> {
        let raw = RawEnvelope {
            kind: self.message.type_tag().to_string(),
            room_id: self.room_id.clone(),
            sender_id: self.sender_id.clone(),
            payload: self.message.payload()?,
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Decode an envelope JSON string.
    ///
    /// Returns `Ok(None)` for well-formed envelopes of an unknown type.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MalformedEnvelope` if the string is not an
    /// envelope, a required field is missing or empty, or the payload does
    /// not fit its type.
    pub fn decode(s: &str) -> Result<Option<Self>, SyncError> {
        let raw: RawEnvelope = serde_json::from_str(s)
            .map_err(|e| SyncError::MalformedEnvelope(format!("envelope: {}", e)))?;

        if raw.room_id.is_empty() {
            return Err(SyncError::MalformedEnvelope("empty roomId".to_string()));
        }
        if raw.sender_id.is_empty() {
            return Err(SyncError::MalformedEnvelope("empty senderId".to_string()));
        }

        let Some(message) = SyncMessage::from_parts(&raw.kind, raw.payload)? else {
            return Ok(None);
        };

        Ok(Some(Self {
            room_id: raw.room_id,
            sender_id: raw.sender_id,
            message,
        }))
    }
}

/// Outer frame as delivered by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Relay event kind, `message` for envelopes
    pub event: String,

    /// Topic the frame was published to
    pub topic: String,

    /// Encoded envelope (empty for non-message events)
    #[serde(default)]
    pub message: String,
}

impl WireFrame {
    /// Wrap an encoded envelope for delivery on a topic
    pub fn message(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event: MESSAGE_EVENT.to_string(),
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Serialize the frame to JSON
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a frame from raw relay data
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        serde_json::from_str(raw).map_err(|e| SyncError::MalformedEnvelope(format!("frame: {}", e)))
    }

    /// Check if this frame carries an envelope
    pub fn is_message(&self) -> bool {
        self.event == MESSAGE_EVENT
    }
}

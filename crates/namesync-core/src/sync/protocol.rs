//! Like-sync protocol messages
//!
//! Messages are carried as JSON inside a [`SyncEnvelope`](super::SyncEnvelope).
//!
//! ## Protocol Overview
//!
//! 1. **join**: A partner opened the room channel; peers answer with a snapshot
//! 2. **state_snapshot**: Full like list and batch version, replaces the cache
//! 3. **likes_batch**: Items liked since the previous batch, strictly versioned
//! 4. **resync_request**: Receiver saw a version gap and wants a snapshot
//! 5. **resync_response**: Applied exactly like a snapshot
//!
//! ## Message Flow
//!
//! ```text
//! Partner A                         Partner B
//!   |                                  |
//!   |--- join {likeVersion: 0} ------->|
//!   |--- state_snapshot {likes, 0} --->|
//!   |<-- state_snapshot {likes, 2} ----|
//!   |                                  |
//!   |--- likes_batch {[Emma], 1} ----->|   (applied: 0 + 1 == 1)
//!   |--- likes_batch {[Noah], 2} --X   |   (lost)
//!   |--- likes_batch {[Liam], 3} ----->|   (gap: expected 2)
//!   |<-- resync_request {known: 1} ----|
//!   |--- state_snapshot {likes, 3} --->|   (cache replaced)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Wire tag for [`SyncMessage::Join`]
pub const JOIN: &str = "join";
/// Wire tag for [`SyncMessage::StateSnapshot`]
pub const STATE_SNAPSHOT: &str = "state_snapshot";
/// Wire tag for [`SyncMessage::LikesBatch`]
pub const LIKES_BATCH: &str = "likes_batch";
/// Wire tag for [`SyncMessage::ResyncRequest`]
pub const RESYNC_REQUEST: &str = "resync_request";
/// Wire tag for [`SyncMessage::ResyncResponse`]
pub const RESYNC_RESPONSE: &str = "resync_response";

/// Messages exchanged between the two partners of a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Sender just opened the room channel
    Join {
        /// Sender's current batch version
        like_version: u64,
    },

    /// Sender's full like list
    StateSnapshot {
        /// Every item the sender likes
        likes: Vec<String>,
        /// Sender's current batch version
        like_version: u64,
    },

    /// Items the sender liked since its previous batch
    LikesBatch {
        /// Newly liked items only
        likes: Vec<String>,
        /// Version of this batch, one more than the previous batch
        like_version: u64,
    },

    /// Ask the partner for a fresh snapshot
    ResyncRequest {
        /// Last partner batch version the sender integrated
        known_version: u64,
    },

    /// Full like list sent in answer to a resync request
    ResyncResponse {
        /// Every item the sender likes
        likes: Vec<String>,
        /// Sender's current batch version
        like_version: u64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikesPayload {
    likes: Vec<String>,
    like_version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    like_version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResyncRequestPayload {
    known_version: u64,
}

impl SyncMessage {
    /// Wire tag for the `type` field
    pub fn type_tag(&self) -> &'static str {
        match self {
            SyncMessage::Join { .. } => JOIN,
            SyncMessage::StateSnapshot { .. } => STATE_SNAPSHOT,
            SyncMessage::LikesBatch { .. } => LIKES_BATCH,
            SyncMessage::ResyncRequest { .. } => RESYNC_REQUEST,
            SyncMessage::ResyncResponse { .. } => RESYNC_RESPONSE,
        }
    }

    /// Encode the `payload` object
    pub fn payload(&self) -> Result<Value, SyncError> {
        let value = match self {
            SyncMessage::Join { like_version } => serde_json::to_value(JoinPayload {
                like_version: *like_version,
            })?,
            SyncMessage::StateSnapshot {
                likes,
                like_version,
            }
            | SyncMessage::LikesBatch {
                likes,
                like_version,
            }
            | SyncMessage::ResyncResponse {
                likes,
                like_version,
            } => serde_json::to_value(LikesPayload {
                likes: likes.clone(),
                like_version: *like_version,
            })?,
            SyncMessage::ResyncRequest { known_version } => {
                serde_json::to_value(ResyncRequestPayload {
                    known_version: *known_version,
                })?
            }
        };
        Ok(value)
    }

    /// Decode a message from its wire tag and payload.
    ///
    /// Returns `Ok(None)` for tags this protocol does not know, so newer
    /// peers can add message types without breaking older ones.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MalformedEnvelope` if the payload does not match
    /// the shape required by a known tag.
    pub fn from_parts(tag: &str, payload: Value) -> Result<Option<Self>, SyncError> {
        let malformed =
            |e: serde_json::Error| SyncError::MalformedEnvelope(format!("{} payload: {}", tag, e));

        let msg = match tag {
            JOIN => {
                let p: JoinPayload = serde_json::from_value(payload).map_err(malformed)?;
                SyncMessage::Join {
                    like_version: p.like_version,
                }
            }
            STATE_SNAPSHOT | LIKES_BATCH | RESYNC_RESPONSE => {
                let p: LikesPayload = serde_json::from_value(payload).map_err(malformed)?;
                let likes = p.likes.into_iter().filter(|s| !s.is_empty()).collect();
                match tag {
                    STATE_SNAPSHOT => SyncMessage::StateSnapshot {
                        likes,
                        like_version: p.like_version,
                    },
                    LIKES_BATCH => SyncMessage::LikesBatch {
                        likes,
                        like_version: p.like_version,
                    },
                    _ => SyncMessage::ResyncResponse {
                        likes,
                        like_version: p.like_version,
                    },
                }
            }
            RESYNC_REQUEST => {
                let p: ResyncRequestPayload =
                    serde_json::from_value(payload).map_err(malformed)?;
                SyncMessage::ResyncRequest {
                    known_version: p.known_version,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }

    /// Check if this message carries a full like list
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            SyncMessage::StateSnapshot { .. } | SyncMessage::ResyncResponse { .. }
        )
    }
}

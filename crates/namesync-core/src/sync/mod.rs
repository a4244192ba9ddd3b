//! Relay-based synchronization layer
//!
//! Two partners share a room; each room maps to a relay topic where both
//! instances publish their likes and receive the other's.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SessionManager (room lifecycle, reconnection)                  │
//! │  ├── Transport (connect to topic, publish frame)                │
//! │  │   └── MemoryRelay (in-process relay with fault injection)    │
//! │  ├── SyncEngine (like sets, versions, matches)                  │
//! │  └── broadcast::Sender<SessionEvent> (UI updates)               │
//! │                                                                 │
//! │  Wire                                                           │
//! │  ├── WireFrame   {event, topic, message}                        │
//! │  └── SyncEnvelope {type, roomId, senderId, payload}             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Five message types:
//!
//! - **join**: Announce presence, ask the partner for their state
//! - **state_snapshot**: Full like set and version
//! - **likes_batch**: Incremental likes, one version step each
//! - **resync_request**: Sent on a version gap
//! - **resync_response**: Full state in reply to a resync request

pub mod envelope;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use envelope::{SyncEnvelope, WireFrame, MESSAGE_EVENT};
pub use events::{ConnectionStatus, SessionEvent};
pub use manager::SessionManager;
pub use protocol::SyncMessage;
pub use relay::{FaultConfig, MemoryRelay};
pub use transport::{ChannelEvent, ChannelHandle, Transport};

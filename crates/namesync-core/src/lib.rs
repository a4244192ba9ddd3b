//! NameSync Core Library
//!
//! Two partners like items independently; whatever both like is a match.
//!
//! ## Overview
//!
//! Each partner runs one instance. Instances meet in a room identified by a
//! short code and exchange like sets over an unreliable public pub/sub relay.
//! Batches carry a per-sender version so a lost or reordered batch is
//! detected and repaired with a full-state resync.
//!
//! ## Core Principles
//!
//! - **Local-first**: Likes are recorded and persisted even while offline
//! - **Self-healing**: Version gaps trigger resync; dropped channels reconnect
//! - **Generation-scoped**: Work from an abandoned room never leaks into the next
//!
//! ## Quick Start
//!
//! ```ignore
//! use namesync_core::{DisconnectPolicy, MemoryRelay, MemoryStore, SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = MemoryRelay::new();
//!     let alice = SessionManager::new(relay.clone(), MemoryStore::new(), SessionConfig::default())?;
//!     let bob = SessionManager::new(relay, MemoryStore::new(), SessionConfig::default())?;
//!
//!     let room = alice.create_room().await?;
//!     bob.join_room(room.as_str()).await?;
//!
//!     alice.notify_like("Emma");
//!     bob.notify_like("Emma");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod room;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use config::{
    DisconnectPolicy, ReconnectPolicy, SessionConfig, DEFAULT_SHARE_BASE_URL, DEFAULT_TOPIC_PREFIX,
};
pub use engine::{EngineAction, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use room::RoomCode;
pub use storage::{LocalStore, MemoryStore, RedbStore, SessionStore};
pub use sync::{
    ChannelEvent, ChannelHandle, ConnectionStatus, FaultConfig, MemoryRelay, SessionEvent,
    SessionManager, SyncEnvelope, SyncMessage, Transport, WireFrame,
};
pub use types::*;

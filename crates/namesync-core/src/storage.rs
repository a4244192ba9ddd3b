//! Local key-value persistence.
//!
//! This module provides the synchronous key-value interface the session
//! persists through, plus typed accessors for:
//! - Instance identity
//! - Own liked items
//! - Active room code
//! - Cached partner like set
//!
//! Values are stored as strings; lists are JSON arrays.

use std::sync::Arc;

use tracing::warn;

use crate::error::SyncError;
use crate::room::RoomCode;
use crate::types::{InstanceId, LikeSet};

mod durable;
mod memory;

pub use durable::RedbStore;
pub use memory::MemoryStore;

/// Key for the persisted instance identifier
pub const INSTANCE_ID_KEY: &str = "namesync.instance_id";
/// Key for the local user's liked items
pub const LIKES_KEY: &str = "namesync.likes";
/// Key for the active room code
pub const ROOM_KEY: &str = "namesync.room";
/// Key for the cached partner like set
pub const REMOTE_LIKES_KEY: &str = "namesync.remote_likes";

/// Synchronous string key-value store
pub trait LocalStore: Send + Sync + 'static {
    /// Read a value, `None` if the key is absent
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;

    /// Delete a key. Succeeds if the key is absent.
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// Typed view over a [`LocalStore`]. Clones share the same store.
pub struct SessionStore<S> {
    inner: Arc<S>,
}

impl<S> Clone for SessionStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: LocalStore> SessionStore<S> {
    /// Wrap a raw store
    pub fn new(inner: S) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Access the underlying store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════

    /// Load the instance identifier, creating and persisting one on first use.
    pub fn instance_id(&self) -> Result<InstanceId, SyncError> {
        if let Some(id) = self.inner.get(INSTANCE_ID_KEY)? {
            if !id.is_empty() {
                return Ok(InstanceId::from_string(id));
            }
        }
        let id = InstanceId::new();
        self.inner.set(INSTANCE_ID_KEY, id.as_str())?;
        Ok(id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Likes
    // ═══════════════════════════════════════════════════════════════════════

    /// Load the local user's liked items
    pub fn load_likes(&self) -> Result<LikeSet, SyncError> {
        self.load_set(LIKES_KEY)
    }

    /// Persist the local user's liked items
    pub fn save_likes(&self, likes: &LikeSet) -> Result<(), SyncError> {
        self.save_set(LIKES_KEY, likes)
    }

    /// Forget the local user's liked items
    pub fn clear_likes(&self) -> Result<(), SyncError> {
        self.inner.remove(LIKES_KEY)
    }

    /// Load the cached partner like set
    pub fn load_remote_likes(&self) -> Result<LikeSet, SyncError> {
        self.load_set(REMOTE_LIKES_KEY)
    }

    /// Persist the cached partner like set
    pub fn save_remote_likes(&self, likes: &LikeSet) -> Result<(), SyncError> {
        self.save_set(REMOTE_LIKES_KEY, likes)
    }

    /// Forget the cached partner like set
    pub fn clear_remote_likes(&self) -> Result<(), SyncError> {
        self.inner.remove(REMOTE_LIKES_KEY)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Room
    // ═══════════════════════════════════════════════════════════════════════

    /// Load the active room code.
    ///
    /// A stored value that no longer parses is discarded.
    pub fn load_room(&self) -> Result<Option<RoomCode>, SyncError> {
        let Some(raw) = self.inner.get(ROOM_KEY)? else {
            return Ok(None);
        };
        match RoomCode::parse(&raw) {
            Ok(code) => Ok(Some(code)),
            Err(_) => {
                warn!(stored = %raw, "Discarding invalid stored room code");
                self.inner.remove(ROOM_KEY)?;
                Ok(None)
            }
        }
    }

    /// Persist the active room code
    pub fn save_room(&self, room: &RoomCode) -> Result<(), SyncError> {
        self.inner.set(ROOM_KEY, room.as_str())
    }

    /// Forget the active room code
    pub fn clear_room(&self) -> Result<(), SyncError> {
        self.inner.remove(ROOM_KEY)
    }

    fn load_set(&self, key: &str) -> Result<LikeSet, SyncError> {
        let Some(raw) = self.inner.get(key)? else {
            return Ok(LikeSet::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(items) => Ok(items.into_iter().filter(|s| !s.is_empty()).collect()),
            Err(e) => {
                warn!(key, error = %e, "Stored like list is corrupt, starting empty");
                Ok(LikeSet::new())
            }
        }
    }

    fn save_set(&self, key: &str, likes: &LikeSet) -> Result<(), SyncError> {
        let data = serde_json::to_string(likes)?;
        self.inner.set(key, &data)
    }
}

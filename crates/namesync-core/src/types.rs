//! Core types for namesync

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Insertion-ordered set of liked item identifiers
pub type LikeSet = IndexSet<String>;

/// Stable identifier for one client instance (device or tab)
///
/// Used to recognise and drop our own broadcasts when the relay echoes
/// them back. Uses ULID so identifiers are unique without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Create a new random InstanceId
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap a previously persisted identifier
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short: String = self.0.chars().take(8).collect();
        write!(f, "inst_{}", short)
    }
}

/// Cached mirror of the partner's like set
///
/// `like_version` is the last contiguous batch version integrated from the
/// partner. It is replaced wholesale by snapshots and advanced by exactly one
/// per accepted batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    /// Items the partner is known to like
    pub likes: LikeSet,
    /// Last integrated batch version
    pub like_version: u64,
}

impl RemoteState {
    /// Build a remote state from a snapshot payload
    pub fn from_snapshot(likes: impl IntoIterator<Item = String>, like_version: u64) -> Self {
        Self {
            likes: likes.into_iter().collect(),
            like_version,
        }
    }

    /// Version a batch must carry to be applied next
    pub fn expected_batch_version(&self) -> u64 {
        self.like_version + 1
    }
}

/// Set intersection of local and remote likes, in local insertion order
pub fn intersect(local: &LikeSet, remote: &LikeSet) -> Vec<String> {
    local
        .iter()
        .filter(|item| remote.contains(item.as_str()))
        .cloned()
        .collect()
}

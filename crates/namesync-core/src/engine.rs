//! Session sync engine
//!
//! The `SyncEngine` owns both like sets and the protocol rules that keep the
//! partner's copy of them convergent over a lossy, duplicating, reordering
//! relay. It performs no I/O itself: operations return [`EngineAction`]s
//! that the session supervisor carries out (publishing, status changes).
//!
//! ## Versioning
//!
//! Local likes leave in debounced batches. Each flushed batch bumps the
//! local like version by one, and the receiver only applies a batch whose
//! version is exactly one more than the last one it applied. Anything else
//! (a gap, a duplicate, a reordering) is answered with a `resync_request`
//! and the partner replies with a full snapshot, which replaces the cache.
//!
//! ## Matches
//!
//! Matches are never stored: they are `local ∩ remote`, recomputed after
//! every mutation of either side. A known-matches cache only serves to
//! detect which items newly entered the set so `MatchFound` fires once.

use std::collections::HashSet;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::storage::{LocalStore, SessionStore};
use crate::sync::envelope::SyncEnvelope;
use crate::sync::events::SessionEvent;
use crate::sync::protocol::SyncMessage;
use crate::types::{intersect, InstanceId, LikeSet, RemoteState};

/// Side effects requested by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Publish this message to the room
    Publish(SyncMessage),
    /// Partner state was received; the session counts as connected
    RemoteSeen,
}

/// Protocol state for one client instance
pub struct SyncEngine<S> {
    store: SessionStore<S>,
    instance_id: InstanceId,
    event_tx: broadcast::Sender<SessionEvent>,

    /// Items the local user likes
    local_likes: LikeSet,
    /// Batches sent in the current room lifetime
    like_version: u64,
    /// Items liked since the last flushed batch
    pending: LikeSet,
    /// Bumped by every like; a flush only runs for the latest epoch
    flush_epoch: u64,
    /// Cached partner state
    remote: RemoteState,
    /// Matches already announced
    known_matches: HashSet<String>,
    /// Current match set in local order
    matches: Vec<String>,
    /// Whether a room is active
    in_room: bool,
}

impl<S: LocalStore> SyncEngine<S> {
    /// Create an engine, loading the local like set from storage
    pub fn new(
        store: SessionStore<S>,
        instance_id: InstanceId,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Result<Self, SyncError> {
        let local_likes = store.load_likes()?;
        Ok(Self {
            store,
            instance_id,
            event_tx,
            local_likes,
            like_version: 0,
            pending: LikeSet::new(),
            flush_epoch: 0,
            remote: RemoteState::default(),
            known_matches: HashSet::new(),
            matches: Vec::new(),
            in_room: false,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// This instance's identifier
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Items the local user likes, in the order they were liked
    pub fn local_likes(&self) -> &LikeSet {
        &self.local_likes
    }

    /// Number of batches sent in this room lifetime
    pub fn like_version(&self) -> u64 {
        self.like_version
    }

    /// Items waiting for the next batch
    pub fn pending(&self) -> &LikeSet {
        &self.pending
    }

    /// Cached partner state
    pub fn remote_state(&self) -> &RemoteState {
        &self.remote
    }

    /// Current matches, in local like order
    pub fn matches(&self) -> &[String] {
        &self.matches
    }

    /// Whether the engine is attached to a room
    pub fn in_room(&self) -> bool {
        self.in_room
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Load the cached partner like set and announce the resulting matches.
    ///
    /// No network traffic is generated. The partner version restarts at 0
    /// since version continuity is not assumed across reloads.
    pub fn initialize_from_storage(&mut self) -> Result<(), SyncError> {
        self.local_likes = self.store.load_likes()?;
        self.remote = RemoteState::from_snapshot(self.store.load_remote_likes()?, 0);
        self.like_version = 0;

        self.matches = intersect(&self.local_likes, &self.remote.likes);
        self.known_matches = self.matches.iter().cloned().collect();
        info!(
            likes = self.local_likes.len(),
            remote_likes = self.remote.likes.len(),
            matches = self.matches.len(),
            "Engine initialized from storage"
        );
        self.emit(SessionEvent::MatchesUpdated {
            matches: self.matches.clone(),
        });
        Ok(())
    }

    /// Reset per-room state before (re)joining a room.
    ///
    /// Clears the pending buffer, cancels any scheduled flush and restarts
    /// both version counters. When `same_room` is false the cached partner
    /// likes are dropped too so nothing bleeds across rooms; rejoining the
    /// same room keeps them until the partner's snapshot replaces them.
    pub fn prepare_for_join(&mut self, same_room: bool) {
        self.pending.clear();
        self.flush_epoch += 1;
        self.like_version = 0;
        self.remote.like_version = 0;
        if !same_room {
            self.remote = RemoteState::default();
            self.known_matches.clear();
        }
        self.in_room = true;
        self.refresh_matches(false);
        debug!(same_room, "Engine prepared for join");
    }

    /// Detach from the room without touching cached partner state.
    ///
    /// Used when a join attempt fails.
    pub fn suspend(&mut self) {
        self.pending.clear();
        self.flush_epoch += 1;
        self.in_room = false;
    }

    /// Leave the room: drop all partner state, cached and persisted.
    pub fn leave(&mut self) {
        self.pending.clear();
        self.flush_epoch += 1;
        self.like_version = 0;
        self.remote = RemoteState::default();
        self.known_matches.clear();
        self.matches.clear();
        self.in_room = false;
        if let Err(e) = self.store.clear_remote_likes() {
            warn!(error = %e, "Failed to clear cached partner likes");
        }
        self.emit(SessionEvent::MatchesUpdated {
            matches: Vec::new(),
        });
    }

    /// Forget every local like
    pub fn clear_local_likes(&mut self) -> Result<(), SyncError> {
        self.local_likes.clear();
        self.pending.clear();
        self.store.clear_likes()?;
        self.refresh_matches(false);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a like and queue it for the next batch.
    ///
    /// Returns the flush epoch the caller should pass to [`flush`](Self::flush)
    /// once the debounce delay has elapsed, or `None` when nothing was
    /// queued (empty item, or no active room). Outside a room the item is
    /// still recorded locally and travels in the next snapshot.
    pub fn notify_like(&mut self, item: &str) -> Option<u64> {
        let item = item.trim();
        if item.is_empty() {
            return None;
        }

        if self.local_likes.insert(item.to_string()) {
            self.persist_local_likes();
        }

        // Cached partner likes outlive the room, so matches can form here too.
        if self.remote.likes.contains(item) {
            self.refresh_matches(true);
        }

        if !self.in_room {
            debug!(item, "Like recorded outside a room");
            return None;
        }

        self.pending.insert(item.to_string());
        self.flush_epoch += 1;
        Some(self.flush_epoch)
    }

    /// Remove a like.
    ///
    /// Returns a snapshot to publish when in a room, since batches can only
    /// add items and the partner must replace its cached copy.
    pub fn notify_unlike(&mut self, item: &str) -> Option<SyncMessage> {
        let item = item.trim();
        if !self.local_likes.shift_remove(item) {
            return None;
        }
        self.pending.shift_remove(item);
        self.persist_local_likes();
        self.refresh_matches(false);

        self.in_room.then(|| self.snapshot_message())
    }

    /// Build the batch for the debounce timer that fired with `epoch`.
    ///
    /// Returns `None` if a later like restarted the timer, the room was left,
    /// or nothing is pending. The version is bumped before publishing, so a
    /// batch lost in transit shows up as a gap on the partner's side.
    pub fn flush(&mut self, epoch: u64) -> Option<SyncMessage> {
        if epoch != self.flush_epoch || !self.in_room || self.pending.is_empty() {
            return None;
        }
        self.like_version += 1;
        let likes: Vec<String> = self.pending.drain(..).collect();
        debug!(version = self.like_version, count = likes.len(), "Flushing like batch");
        Some(SyncMessage::LikesBatch {
            likes,
            like_version: self.like_version,
        })
    }

    /// Messages sent when a channel opens: `join` followed by a snapshot,
    /// so both sides converge even if the partner's `join` raced ours.
    pub fn handshake_messages(&self) -> Vec<SyncMessage> {
        vec![
            SyncMessage::Join {
                like_version: self.like_version,
            },
            self.snapshot_message(),
        ]
    }

    /// Full local state as a `state_snapshot`
    pub fn snapshot_message(&self) -> SyncMessage {
        SyncMessage::StateSnapshot {
            likes: self.local_likes.iter().cloned().collect(),
            like_version: self.like_version,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply an inbound envelope.
    ///
    /// Our own echoed broadcasts are ignored, as is everything while no
    /// room is active.
    pub fn handle_message(&mut self, envelope: &SyncEnvelope) -> Vec<EngineAction> {
        if envelope.sender_id == self.instance_id.as_str() {
            return Vec::new();
        }
        if !self.in_room {
            debug!(kind = envelope.message.type_tag(), "Ignoring message outside a room");
            return Vec::new();
        }

        match &envelope.message {
            SyncMessage::Join { like_version } => {
                debug!(remote_version = like_version, "Partner joined, sending snapshot");
                vec![EngineAction::Publish(self.snapshot_message())]
            }
            SyncMessage::ResyncRequest { known_version } => {
                debug!(known_version, "Partner requested resync");
                vec![EngineAction::Publish(self.snapshot_message())]
            }
            SyncMessage::StateSnapshot {
                likes,
                like_version,
            }
            | SyncMessage::ResyncResponse {
                likes,
                like_version,
            } => {
                self.apply_snapshot(likes, *like_version);
                vec![EngineAction::RemoteSeen]
            }
            SyncMessage::LikesBatch {
                likes,
                like_version,
            } => self.apply_batch(likes, *like_version),
        }
    }

    fn apply_snapshot(&mut self, likes: &[String], like_version: u64) {
        debug!(
            count = likes.len(),
            version = like_version,
            "Replacing partner state from snapshot"
        );
        self.remote = RemoteState::from_snapshot(likes.iter().cloned(), like_version);
        self.persist_remote_likes();
        self.refresh_matches(true);
    }

    fn apply_batch(&mut self, likes: &[String], like_version: u64) -> Vec<EngineAction> {
        let expected = self.remote.expected_batch_version();
        if like_version != expected {
            info!(
                expected,
                received = like_version,
                known = self.remote.like_version,
                "Version gap, requesting resync"
            );
            return vec![EngineAction::Publish(SyncMessage::ResyncRequest {
                known_version: self.remote.like_version,
            })];
        }

        self.remote.likes.extend(likes.iter().cloned());
        self.remote.like_version = like_version;
        self.persist_remote_likes();
        self.refresh_matches(true);
        vec![EngineAction::RemoteSeen]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// Recompute matches and emit events for what changed.
    ///
    /// With `celebrate`, each item that newly entered the set gets a
    /// `MatchFound` before the `MatchesUpdated`.
    fn refresh_matches(&mut self, celebrate: bool) {
        let current = intersect(&self.local_likes, &self.remote.likes);

        if celebrate {
            for item in current.iter().filter(|m| !self.known_matches.contains(*m)) {
                info!(%item, "Match found");
                self.emit(SessionEvent::MatchFound { item: item.clone() });
            }
        }

        if current != self.matches {
            self.known_matches = current.iter().cloned().collect();
            self.matches = current;
            self.emit(SessionEvent::MatchesUpdated {
                matches: self.matches.clone(),
            });
        }
    }

    fn persist_local_likes(&self) {
        if let Err(e) = self.store.save_likes(&self.local_likes) {
            warn!(error = %e, "Failed to persist likes");
        }
    }

    fn persist_remote_likes(&self) {
        if let Err(e) = self.store.save_remote_likes(&self.remote.likes) {
            warn!(error = %e, "Failed to persist partner likes");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

//! Session supervisor: room lifecycle, channel ownership and reconnection
//!
//! The `SessionManager` owns the transport channel for the active room and
//! drives the [`SyncEngine`] from it. Every asynchronous continuation
//! (channel reader, debounce timer, reconnect timer, channel open) carries
//! the session generation it was started under and re-checks it before
//! touching state, so work from a superseded join or a disconnect is inert.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SessionManager (cheap to clone, shared state behind Arc)       │
//! │  ├── generation: u64                                            │
//! │  │   └── bumped by join / disconnect, checked by every task     │
//! │  ├── room + status                                              │
//! │  ├── SyncEngine (like sets, versions, matches)                  │
//! │  ├── channel close token                                        │
//! │  └── event_tx: broadcast::Sender<SessionEvent>                  │
//! │                                                                 │
//! │  Connection task (one per generation)                           │
//! │  ├── reads ChannelEvents, routes frames to the engine           │
//! │  └── on unexpected close: backoff, reopen, handshake            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status transitions
//!
//! ```text
//! Disconnected ──join──> Connecting ──open──> InRoom ──snapshot──> Connected
//!                            │                  │                     │
//!                            └──timeout/fail──> Error <──channel error┘
//!      closed unexpectedly: InRoom/Connected ──> Connecting ──(retries)──> Unavailable
//!      disconnect: any ──> Disconnected
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::envelope::{SyncEnvelope, WireFrame};
use super::events::{ConnectionStatus, SessionEvent};
use super::protocol::SyncMessage;
use super::transport::{ChannelEvent, ChannelHandle, Transport};
use crate::config::{DisconnectPolicy, SessionConfig};
use crate::engine::{EngineAction, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::room::RoomCode;
use crate::storage::{LocalStore, SessionStore};
use crate::types::{InstanceId, LikeSet, RemoteState};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Mutable session state, only touched under the lock
struct SessionState<S> {
    generation: u64,
    room: Option<RoomCode>,
    status: ConnectionStatus,
    engine: SyncEngine<S>,
    channel: Option<CancellationToken>,
}

struct Shared<T, S> {
    transport: T,
    store: SessionStore<S>,
    config: SessionConfig,
    instance_id: InstanceId,
    event_tx: broadcast::Sender<SessionEvent>,
    state: Mutex<SessionState<S>>,
}

/// Connection supervisor for one client instance
///
/// # Example
///
/// ```ignore
/// let relay = MemoryRelay::new();
/// let session = SessionManager::new(relay, MemoryStore::new(), SessionConfig::default())?;
/// let mut events = session.subscribe();
///
/// session.initialize_and_reconnect(DisconnectPolicy::NewRoom).await?;
/// println!("Share: {}", session.share_link().unwrap_or_default());
///
/// session.notify_like("Emma");
/// while let Ok(event) = events.recv().await {
///     if let SessionEvent::MatchFound { item } = event {
///         println!("You both like {}!", item);
///     }
/// }
/// ```
pub struct SessionManager<T, S> {
    shared: Arc<Shared<T, S>>,
}

impl<T, S> Clone for SessionManager<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport, S: LocalStore> SessionManager<T, S> {
    /// Create a session over `transport`, persisting through `store`.
    ///
    /// Loads (or issues) the instance identifier and the local like set.
    /// Nothing is announced or joined until
    /// [`initialize_and_reconnect`](Self::initialize_and_reconnect) or
    /// [`join_room`](Self::join_room) is called.
    pub fn new(transport: T, store: S, config: SessionConfig) -> SyncResult<Self> {
        let store = SessionStore::new(store);
        let instance_id = store.instance_id()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let engine = SyncEngine::new(store.clone(), instance_id.clone(), event_tx.clone())?;

        info!(instance = %instance_id, "Session created");

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                store,
                config,
                instance_id,
                event_tx,
                state: Mutex::new(SessionState {
                    generation: 0,
                    room: None,
                    status: ConnectionStatus::Disconnected,
                    engine,
                    channel: None,
                }),
            }),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Subscribe to session events
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// This instance's identifier
    pub fn instance_id(&self) -> &InstanceId {
        &self.shared.instance_id
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status.clone()
    }

    /// Active room, if any
    pub fn room(&self) -> Option<RoomCode> {
        self.shared.state.lock().room.clone()
    }

    /// Share link for the active room
    pub fn share_link(&self) -> Option<String> {
        self.room()
            .map(|room| room.share_link(&self.shared.config.share_base_url))
    }

    /// Current session generation
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Current matches, in local like order
    pub fn matches(&self) -> Vec<String> {
        self.shared.state.lock().engine.matches().to_vec()
    }

    /// Items the local user likes
    pub fn local_likes(&self) -> LikeSet {
        self.shared.state.lock().engine.local_likes().clone()
    }

    /// Cached partner state
    pub fn remote_state(&self) -> RemoteState {
        self.shared.state.lock().engine.remote_state().clone()
    }

    /// Batches sent in the current room lifetime
    pub fn like_version(&self) -> u64 {
        self.shared.state.lock().engine.like_version()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Room lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Load cached state and resume the stored room, if any.
    ///
    /// Without a stored room the session stays idle, or creates a fresh room
    /// under [`DisconnectPolicy::NewRoom`]. A failed resume leaves the stored
    /// room in place so the next launch tries again.
    pub async fn initialize_and_reconnect(
        &self,
        policy: DisconnectPolicy,
    ) -> SyncResult<Option<RoomCode>> {
        self.shared.state.lock().engine.initialize_from_storage()?;

        match self.shared.store.load_room()? {
            Some(room) => {
                info!(%room, "Resuming stored room");
                self.join_room(room.as_str()).await.map(Some)
            }
            None => match policy {
                DisconnectPolicy::NewRoom => self.create_room().await.map(Some),
                DisconnectPolicy::Stay => Ok(None),
            },
        }
    }

    /// Generate a fresh room code and join it
    pub async fn create_room(&self) -> SyncResult<RoomCode> {
        let room = RoomCode::generate();
        self.join_room(room.as_str()).await
    }

    /// Join the room identified by `code`.
    ///
    /// Any previous room channel is closed first. The room code is persisted
    /// only once the channel is confirmed open.
    ///
    /// # Errors
    ///
    /// - `SyncError::InvalidRoomCode` if `code` fails validation (no network
    ///   activity happens)
    /// - `SyncError::ConnectionTimeout` if the channel does not open in time
    /// - `SyncError::ConnectionFailed` / `SyncError::ChannelError` if the
    ///   transport fails, or a newer join/disconnect superseded this one
    pub async fn join_room(&self, code: &str) -> SyncResult<RoomCode> {
        let room = RoomCode::parse(code)?;

        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            if let Some(token) = state.channel.take() {
                token.cancel();
            }

            let stored = match self.shared.store.load_room() {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Failed to read stored room");
                    None
                }
            };
            let same_room = state.room.as_ref() == Some(&room) || stored.as_ref() == Some(&room);
            if !same_room {
                if let Err(e) = self.shared.store.clear_remote_likes() {
                    warn!(error = %e, "Failed to clear cached partner likes");
                }
            }
            state.engine.prepare_for_join(same_room);

            if state.room.as_ref() != Some(&room) {
                state.room = Some(room.clone());
                self.emit(SessionEvent::RoomChanged {
                    room: Some(room.clone()),
                });
            }
            self.set_status(&mut state, ConnectionStatus::Connecting);
            state.generation
        };

        info!(%room, generation, "Joining room");

        let handle = match self.open_channel(&room).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%room, generation, error = %e, "Join failed");
                let mut state = self.shared.state.lock();
                if state.generation == generation {
                    state.engine.suspend();
                    state.room = None;
                    self.emit(SessionEvent::RoomChanged { room: None });
                    self.set_status(&mut state, ConnectionStatus::Error(e.to_string()));
                }
                return Err(e);
            }
        };

        let Some(handshake) = self.on_channel_open(generation, &room, &handle) else {
            return Err(SyncError::ConnectionFailed(format!(
                "join of {} superseded",
                room
            )));
        };

        if let Err(e) = self.shared.store.save_room(&room) {
            warn!(%room, error = %e, "Failed to persist room code");
        }

        let session = self.clone();
        let task_room = room.clone();
        tokio::spawn(async move {
            session.run_connection(generation, task_room, handle).await;
        });

        for msg in handshake {
            self.publish(generation, &room, msg).await;
        }

        Ok(room)
    }

    /// Leave the active room.
    ///
    /// Invalidates every in-flight task of the current generation, closes the
    /// channel, forgets the room and partner state, and announces an empty
    /// match list. Under [`DisconnectPolicy::NewRoom`] a fresh room is then
    /// created and joined, and its code returned.
    pub async fn disconnect(&self, policy: DisconnectPolicy) -> SyncResult<Option<RoomCode>> {
        {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            if let Some(token) = state.channel.take() {
                token.cancel();
            }
            let had_room = state.room.take().is_some();
            state.engine.leave();
            if had_room {
                self.emit(SessionEvent::RoomChanged { room: None });
            }
            self.set_status(&mut state, ConnectionStatus::Disconnected);
            info!(generation = state.generation, "Disconnected");
        }

        self.shared.store.clear_room()?;

        match policy {
            DisconnectPolicy::Stay => Ok(None),
            DisconnectPolicy::NewRoom => self.create_room().await.map(Some),
        }
    }

    /// Disconnect and forget every local like
    pub async fn reset_all(&self) -> SyncResult<()> {
        self.disconnect(DisconnectPolicy::Stay).await?;
        self.shared.state.lock().engine.clear_local_likes()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Likes
    // ═══════════════════════════════════════════════════════════════════════

    /// Like an item.
    ///
    /// The item is queued and published in a batch once no further like has
    /// arrived for the debounce delay. Publish failures are logged only.
    /// Outside a room nothing is published: the like is still recorded and
    /// matched against cached partner likes, and reaches the partner in the
    /// snapshot sent on the next join.
    /// Must be called from within a Tokio runtime.
    pub fn notify_like(&self, item: &str) {
        let scheduled = {
            let mut state = self.shared.state.lock();
            let epoch = state.engine.notify_like(item);
            match (epoch, state.room.clone()) {
                (Some(epoch), Some(room)) => Some((epoch, state.generation, room)),
                _ => None,
            }
        };

        let Some((epoch, generation, room)) = scheduled else {
            return;
        };

        let session = self.clone();
        let debounce = self.shared.config.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let batch = {
                let mut state = session.shared.state.lock();
                if state.generation != generation {
                    return;
                }
                state.engine.flush(epoch)
            };
            if let Some(msg) = batch {
                session.publish(generation, &room, msg).await;
            }
        });
    }

    /// Remove a like and publish a snapshot so the partner drops it too.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn notify_unlike(&self, item: &str) {
        let snapshot = {
            let mut state = self.shared.state.lock();
            let msg = state.engine.notify_unlike(item);
            match (msg, state.room.clone()) {
                (Some(msg), Some(room)) => Some((msg, state.generation, room)),
                _ => None,
            }
        };

        if let Some((msg, generation, room)) = snapshot {
            let session = self.clone();
            tokio::spawn(async move {
                session.publish(generation, &room, msg).await;
            });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Channel handling
    // ═══════════════════════════════════════════════════════════════════════

    /// Connect to the room topic and wait for the open notice, bounded by
    /// the connect timeout.
    async fn open_channel(&self, room: &RoomCode) -> SyncResult<ChannelHandle> {
        let topic = self.topic(room);
        let timeout = self.shared.config.connect_timeout;

        let open = async {
            let mut handle = self.shared.transport.connect(&topic).await?;
            handle.wait_open().await?;
            Ok::<_, SyncError>(handle)
        };

        match tokio::time::timeout(timeout, open).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::ConnectionTimeout(timeout.as_millis() as u64)),
        }
    }

    /// Adopt a freshly opened channel if `generation` is still current.
    ///
    /// Returns the handshake messages to publish, or `None` (closing the
    /// channel) when the generation was superseded while opening.
    fn on_channel_open(
        &self,
        generation: u64,
        room: &RoomCode,
        handle: &ChannelHandle,
    ) -> Option<Vec<SyncMessage>> {
        let mut state = self.shared.state.lock();
        if state.generation != generation {
            debug!(%room, generation, current = state.generation, "Discarding stale channel");
            handle.close();
            return None;
        }
        if let Some(old) = state.channel.replace(handle.close_token()) {
            old.cancel();
        }
        self.set_status(&mut state, ConnectionStatus::InRoom);
        info!(%room, generation, "Room channel open");
        Some(state.engine.handshake_messages())
    }

    /// Drive one generation's channel until it is closed deliberately or the
    /// reconnect budget runs out.
    async fn run_connection(&self, generation: u64, room: RoomCode, mut handle: ChannelHandle) {
        loop {
            let closed_by_us = self.read_channel(generation, &room, &mut handle).await;
            drop(handle);
            if closed_by_us || !self.is_current(generation) {
                debug!(%room, generation, "Connection task ended");
                return;
            }

            info!(%room, generation, "Room channel lost");
            {
                let mut state = self.shared.state.lock();
                if state.generation != generation {
                    return;
                }
                state.channel = None;
                // An error stays visible until the first retry begins.
                if !matches!(state.status, ConnectionStatus::Error(_)) {
                    self.set_status(&mut state, ConnectionStatus::Connecting);
                }
            }

            match self.reconnect(generation, &room).await {
                Some(reopened) => handle = reopened,
                None => return,
            }
        }
    }

    /// Pump channel events into the engine.
    ///
    /// Returns `true` when the channel was closed by us, `false` when the
    /// transport closed it or reported an error.
    async fn read_channel(
        &self,
        generation: u64,
        room: &RoomCode,
        handle: &mut ChannelHandle,
    ) -> bool {
        let token = handle.close_token();
        loop {
            tokio::select! {
                _ = token.cancelled() => return true,
                event = handle.recv() => match event {
                    Some(ChannelEvent::Message(raw)) => {
                        self.route_inbound(generation, room, &raw).await;
                    }
                    Some(ChannelEvent::Error(e)) => {
                        warn!(%room, generation, error = %e, "Channel error");
                        let mut state = self.shared.state.lock();
                        if state.generation == generation {
                            self.set_status(&mut state, ConnectionStatus::Error(e));
                        }
                        // The channel is abandoned and reopened with backoff.
                        return false;
                    }
                    Some(ChannelEvent::Opened) => {}
                    Some(ChannelEvent::Closed(reason)) => {
                        debug!(%room, generation, %reason, "Channel closed");
                        return token.is_cancelled();
                    }
                    None => return token.is_cancelled(),
                },
            }
        }
    }

    /// Re-open the room channel with exponential backoff.
    ///
    /// Returns the new channel, or `None` if the generation was superseded or
    /// every attempt failed (status becomes `Unavailable`).
    async fn reconnect(&self, generation: u64, room: &RoomCode) -> Option<ChannelHandle> {
        let policy = self.shared.config.reconnect.clone();

        for attempt in 1..=policy.max_attempts {
            let delay = policy.delay_for(attempt);
            debug!(%room, generation, attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            tokio::time::sleep(delay).await;

            {
                let mut state = self.shared.state.lock();
                if state.generation != generation {
                    debug!(%room, generation, "Reconnect cancelled by newer generation");
                    return None;
                }
                self.set_status(&mut state, ConnectionStatus::Connecting);
            }

            match self.open_channel(room).await {
                Ok(handle) => {
                    let handshake = self.on_channel_open(generation, room, &handle)?;
                    info!(%room, generation, attempt, "Reconnected");
                    for msg in handshake {
                        self.publish(generation, room, msg).await;
                    }
                    return Some(handle);
                }
                Err(e) => {
                    warn!(%room, generation, attempt, error = %e, "Reconnect attempt failed");
                }
            }
        }

        let mut state = self.shared.state.lock();
        if state.generation == generation {
            warn!(%room, generation, attempts = policy.max_attempts, "Reconnect attempts exhausted");
            self.set_status(&mut state, ConnectionStatus::Unavailable);
        }
        None
    }

    /// Decode a raw frame and hand it to the engine if it belongs to the
    /// current room and generation.
    async fn route_inbound(&self, generation: u64, room: &RoomCode, raw: &str) {
        let frame = match WireFrame::from_json(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%room, error = %e, "Dropping malformed frame");
                return;
            }
        };
        if !frame.is_message() {
            return;
        }
        if frame.topic != self.topic(room) {
            debug!(%room, topic = %frame.topic, "Dropping frame for another topic");
            return;
        }

        let envelope = match SyncEnvelope::decode(&frame.message) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!(%room, "Ignoring envelope of unknown type");
                return;
            }
            Err(e) => {
                debug!(%room, error = %e, "Dropping malformed envelope");
                return;
            }
        };
        if envelope.room_id != room.as_str() {
            debug!(%room, envelope_room = %envelope.room_id, "Dropping envelope for another room");
            return;
        }

        let outbound = {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                debug!(%room, generation, current = state.generation, "Dropping message from stale generation");
                return;
            }

            let mut outbound = Vec::new();
            for action in state.engine.handle_message(&envelope) {
                match action {
                    EngineAction::Publish(msg) => outbound.push(msg),
                    EngineAction::RemoteSeen => {
                        self.set_status(&mut state, ConnectionStatus::Connected);
                    }
                }
            }
            outbound
        };

        for msg in outbound {
            self.publish(generation, room, msg).await;
        }
    }

    /// Publish a message to the room. Failures are logged, never returned.
    async fn publish(&self, generation: u64, room: &RoomCode, message: SyncMessage) {
        if !self.is_current(generation) {
            debug!(%room, generation, kind = message.type_tag(), "Skipping publish for stale generation");
            return;
        }

        let kind = message.type_tag();
        let envelope = SyncEnvelope::new(room.as_str(), self.shared.instance_id.as_str(), message);
        let encoded = match envelope.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(%room, kind, error = %e, "Failed to encode envelope");
                return;
            }
        };

        let topic = self.topic(room);
        match self.shared.transport.publish(&topic, encoded).await {
            Ok(()) => debug!(%room, kind, "Published"),
            Err(e) => warn!(%room, kind, error = %e, "Publish failed"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn topic(&self, room: &RoomCode) -> String {
        room.topic(&self.shared.config.topic_prefix)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.state.lock().generation == generation
    }

    /// Transition status, emitting an event only on change
    fn set_status(&self, state: &mut SessionState<S>, status: ConnectionStatus) {
        if state.status != status {
            debug!(from = %state.status, to = %status, "Status changed");
            state.status = status.clone();
            self.emit(SessionEvent::StatusChanged { status });
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.shared.event_tx.send(event);
    }
}

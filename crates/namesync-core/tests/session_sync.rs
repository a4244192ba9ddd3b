//! Two-partner session tests over the in-memory relay.
//!
//! Every test runs on a paused Tokio clock, so debounce windows, connect
//! timeouts and reconnect backoff elapse instantly and deterministically.

use std::time::Duration;

use namesync_core::{
    ConnectionStatus, DisconnectPolicy, MemoryRelay, MemoryStore, SessionConfig, SessionEvent,
    SessionManager, SessionStore, SyncEnvelope, SyncMessage, WireFrame,
};
use tokio::sync::broadcast;

type Session = SessionManager<MemoryRelay, MemoryStore>;

const ROOM: &str = "abc123";
const TOPIC: &str = "namesync-abc123";

// ============================================================================
// Test Utilities
// ============================================================================

fn new_session(relay: &MemoryRelay) -> Session {
    SessionManager::new(relay.clone(), MemoryStore::new(), SessionConfig::default()).unwrap()
}

/// Let every spawned task run and every debounce window close
async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

/// Two partners joined to the same room and past the handshake
async fn connected_pair(relay: &MemoryRelay) -> (Session, Session) {
    let alice = new_session(relay);
    let bob = new_session(relay);
    alice.join_room(ROOM).await.unwrap();
    bob.join_room(ROOM).await.unwrap();
    settle().await;
    assert_eq!(alice.status(), ConnectionStatus::Connected);
    assert_eq!(bob.status(), ConnectionStatus::Connected);
    (alice, bob)
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn matches_found(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::MatchFound { item } => Some(item.clone()),
            _ => None,
        })
        .collect()
}

/// Decoded envelopes `sender` published to the room topic
fn published_by(relay: &MemoryRelay, sender: &Session) -> Vec<SyncMessage> {
    relay
        .published(TOPIC)
        .iter()
        .filter_map(|raw| SyncEnvelope::decode(raw).ok().flatten())
        .filter(|env| env.sender_id == sender.instance_id().as_str())
        .map(|env| env.message)
        .collect()
}

fn batches(messages: &[SyncMessage]) -> Vec<(Vec<String>, u64)> {
    messages
        .iter()
        .filter_map(|m| match m {
            SyncMessage::LikesBatch {
                likes,
                like_version,
            } => Some((likes.clone(), *like_version)),
            _ => None,
        })
        .collect()
}

fn frame_from(sender: &str, room: &str, message: SyncMessage) -> String {
    let envelope = SyncEnvelope::new(room, sender, message).encode().unwrap();
    WireFrame::message(TOPIC, envelope).to_json().unwrap()
}

// ============================================================================
// Matching
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_basic_match() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, bob) = connected_pair(&relay).await;
    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();

    alice.notify_like("Emma");
    alice.notify_like("Liam");
    bob.notify_like("Noah");
    bob.notify_like("Emma");
    settle().await;

    assert_eq!(alice.matches(), vec!["Emma".to_string()]);
    assert_eq!(bob.matches(), vec!["Emma".to_string()]);
    assert_eq!(matches_found(&drain(&mut alice_events)), vec!["Emma"]);
    assert_eq!(matches_found(&drain(&mut bob_events)), vec!["Emma"]);
}

#[tokio::test(start_paused = true)]
async fn test_likes_before_partner_joins_are_delivered_by_snapshot() {
    let relay = MemoryRelay::with_seed(11);
    let alice = new_session(&relay);
    alice.join_room(ROOM).await.unwrap();
    alice.notify_like("Emma");
    alice.notify_like("Olivia");
    settle().await;

    let bob = new_session(&relay);
    bob.notify_like("Olivia");
    bob.join_room(ROOM).await.unwrap();
    settle().await;

    assert_eq!(bob.matches(), vec!["Olivia".to_string()]);
    assert_eq!(alice.matches(), vec!["Olivia".to_string()]);
    assert_eq!(bob.remote_state().likes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_match_fires_once_under_duplication() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, bob) = connected_pair(&relay).await;
    relay.update_faults(|f| f.duplicate_rate = 1.0);
    let mut alice_events = alice.subscribe();

    alice.notify_like("Emma");
    settle().await;
    bob.notify_like("Emma");
    settle().await;

    assert_eq!(matches_found(&drain(&mut alice_events)), vec!["Emma"]);
    assert_eq!(alice.matches(), bob.matches());
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rapid_likes_coalesce_into_one_batch() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, bob) = connected_pair(&relay).await;

    alice.notify_like("Emma");
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.notify_like("Noah");
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.notify_like("Liam");
    settle().await;

    let sent = batches(&published_by(&relay, &alice));
    assert_eq!(
        sent,
        vec![(
            vec!["Emma".to_string(), "Noah".to_string(), "Liam".to_string()],
            1
        )]
    );
    assert_eq!(alice.like_version(), 1);
    assert_eq!(bob.remote_state().like_version, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_versions_increase_by_one() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, _bob) = connected_pair(&relay).await;

    for name in ["Emma", "Noah", "Liam"] {
        alice.notify_like(name);
        settle().await;
    }

    let versions: Vec<u64> = batches(&published_by(&relay, &alice))
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_is_silent_and_healed_by_resync() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, bob) = connected_pair(&relay).await;

    relay.update_faults(|f| f.fail_publishes = true);
    alice.notify_like("Emma");
    settle().await;
    relay.update_faults(|f| f.fail_publishes = false);

    // version 1 never left; version 2 exposes the gap
    assert_eq!(alice.like_version(), 1);
    alice.notify_like("Noah");
    bob.notify_like("Emma");
    settle().await;

    assert_eq!(bob.remote_state().like_version, 2);
    assert!(bob.remote_state().likes.contains("Emma"));
    assert_eq!(bob.matches(), vec!["Emma".to_string()]);
}

// ============================================================================
// Resync
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_lost_batch_triggers_resync_round_trip() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, bob) = connected_pair(&relay).await;

    relay.update_faults(|f| f.drop_rate = 1.0);
    alice.notify_like("Emma");
    settle().await;
    relay.update_faults(|f| f.drop_rate = 0.0);
    assert_eq!(bob.remote_state().like_version, 0);

    alice.notify_like("Noah");
    settle().await;

    let requests: Vec<u64> = published_by(&relay, &bob)
        .into_iter()
        .filter_map(|m| match m {
            SyncMessage::ResyncRequest { known_version } => Some(known_version),
            _ => None,
        })
        .collect();
    assert_eq!(requests, vec![0]);

    let remote = bob.remote_state();
    assert_eq!(remote.like_version, 2);
    assert_eq!(
        remote.likes.iter().collect::<Vec<_>>(),
        vec!["Emma", "Noah"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_converges_over_lossy_duplicating_reordering_relay() {
    let relay = MemoryRelay::with_seed(42);
    let (alice, bob) = connected_pair(&relay).await;
    relay.update_faults(|f| {
        f.drop_rate = 0.3;
        f.duplicate_rate = 0.3;
        f.reorder_rate = 0.4;
        f.reorder_delay = Duration::from_millis(300);
    });

    let names = ["Emma", "Noah", "Liam", "Olivia", "Ava", "Mia", "Leo", "Zoe"];
    for (i, name) in names.iter().enumerate() {
        if i % 2 == 0 {
            alice.notify_like(name);
        } else {
            bob.notify_like(name);
        }
        if i % 3 == 0 {
            alice.notify_like(name);
            bob.notify_like(name);
        }
        settle().await;
    }

    // Heal with one final clean round of likes from both sides
    relay.update_faults(|f| {
        f.drop_rate = 0.0;
        f.duplicate_rate = 0.0;
        f.reorder_rate = 0.0;
    });
    settle().await;
    alice.notify_like("Final");
    bob.notify_like("Final");
    settle().await;
    settle().await;

    let expected: Vec<String> = alice
        .local_likes()
        .iter()
        .filter(|n| bob.local_likes().contains(*n))
        .cloned()
        .collect();
    assert_eq!(alice.matches(), expected);
    assert_eq!(
        bob.matches().iter().collect::<std::collections::HashSet<_>>(),
        expected.iter().collect::<std::collections::HashSet<_>>()
    );
}

#[tokio::test(start_paused = true)]
async fn test_overtaken_batch_is_healed_by_resync() {
    let relay = MemoryRelay::with_seed(3);
    let (alice, bob) = connected_pair(&relay).await;

    // Alice's first batch is held back long enough for her second to overtake it
    relay.update_faults(|f| {
        f.reorder_rate = 1.0;
        f.reorder_delay = Duration::from_millis(1_000);
    });
    alice.notify_like("Emma");
    tokio::time::sleep(Duration::from_millis(600)).await;
    relay.update_faults(|f| f.reorder_rate = 0.0);
    alice.notify_like("Noah");
    bob.notify_like("Emma");
    bob.notify_like("Noah");
    for _ in 0..4 {
        settle().await;
    }

    assert_eq!(bob.remote_state().likes.len(), 2);
    assert_eq!(bob.matches(), vec!["Emma".to_string(), "Noah".to_string()]);
    assert_eq!(alice.matches(), vec!["Emma".to_string(), "Noah".to_string()]);
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_malformed_and_foreign_frames_are_ignored() {
    let relay = MemoryRelay::with_seed(11);
    let alice = new_session(&relay);
    alice.join_room(ROOM).await.unwrap();
    alice.notify_like("Emma");
    settle().await;
    let snapshot = || SyncMessage::StateSnapshot {
        likes: vec!["Emma".to_string()],
        like_version: 3,
    };

    relay.inject_raw(TOPIC, "not json at all");
    relay.inject_raw(TOPIC, r#"{"event":"presence","topic":"namesync-abc123"}"#);
    relay.inject_raw(
        TOPIC,
        WireFrame::message(TOPIC, "{\"type\":\"join\"}").to_json().unwrap(),
    );
    relay.inject_raw(
        TOPIC,
        WireFrame::message(
            TOPIC,
            r#"{"type":"wave","roomId":"abc123","senderId":"partner","payload":{}}"#,
        )
        .to_json()
        .unwrap(),
    );
    relay.inject_raw(TOPIC, frame_from("partner", "zzz999", snapshot()));
    relay.inject_raw(
        TOPIC,
        frame_from(alice.instance_id().as_str(), ROOM, snapshot()),
    );
    settle().await;

    assert_eq!(alice.status(), ConnectionStatus::InRoom);
    assert!(alice.matches().is_empty());

    relay.inject_raw(TOPIC, frame_from("partner", ROOM, snapshot()));
    settle().await;
    assert_eq!(alice.status(), ConnectionStatus::Connected);
    assert_eq!(alice.matches(), vec!["Emma".to_string()]);
    assert_eq!(alice.remote_state().like_version, 3);
}

#[tokio::test(start_paused = true)]
async fn test_own_echo_does_not_create_matches() {
    let relay = MemoryRelay::with_seed(11);
    let alice = new_session(&relay);
    alice.join_room(ROOM).await.unwrap();
    alice.notify_like("Emma");
    settle().await;

    assert!(alice.matches().is_empty());
    assert!(alice.remote_state().likes.is_empty());
    assert_eq!(alice.status(), ConnectionStatus::InRoom);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_switching_rooms_isolates_old_partner() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, bob) = connected_pair(&relay).await;
    bob.notify_like("Emma");
    settle().await;
    assert_eq!(alice.remote_state().likes.len(), 1);

    let old_generation = alice.generation();
    alice.join_room("zzz999").await.unwrap();
    assert!(alice.generation() > old_generation);
    assert!(alice.remote_state().likes.is_empty());

    bob.notify_like("Noah");
    alice.notify_like("Emma");
    alice.notify_like("Noah");
    settle().await;

    assert!(alice.matches().is_empty());
    assert!(alice.remote_state().likes.is_empty());
    assert_eq!(relay.live_channels(TOPIC), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_clears_matches_and_stored_room() {
    let relay = MemoryRelay::with_seed(11);
    let store = MemoryStore::new();
    let alice =
        SessionManager::new(relay.clone(), store.clone(), SessionConfig::default()).unwrap();
    let bob = new_session(&relay);
    alice.join_room(ROOM).await.unwrap();
    bob.join_room(ROOM).await.unwrap();
    alice.notify_like("Emma");
    bob.notify_like("Emma");
    settle().await;
    assert_eq!(alice.matches().len(), 1);

    let mut events = alice.subscribe();
    alice.disconnect(DisconnectPolicy::Stay).await.unwrap();

    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::MatchesUpdated { matches: vec![] }));
    assert!(events.contains(&SessionEvent::RoomChanged { room: None }));
    assert!(events.contains(&SessionEvent::StatusChanged {
        status: ConnectionStatus::Disconnected
    }));
    let stored = SessionStore::new(store);
    assert_eq!(stored.load_room().unwrap(), None);
    assert!(stored.load_remote_likes().unwrap().is_empty());
    // local likes survive a disconnect
    assert!(stored.load_likes().unwrap().contains("Emma"));

    // Bob keeps his cached view of alice
    assert_eq!(bob.matches(), vec!["Emma".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_restores_matches_without_celebrating() {
    let relay = MemoryRelay::with_seed(11);
    let store = MemoryStore::new();
    {
        let alice =
            SessionManager::new(relay.clone(), store.clone(), SessionConfig::default()).unwrap();
        let bob = new_session(&relay);
        alice.join_room(ROOM).await.unwrap();
        bob.join_room(ROOM).await.unwrap();
        alice.notify_like("Emma");
        bob.notify_like("Emma");
        settle().await;
        assert_eq!(alice.matches().len(), 1);
    }

    let restarted =
        SessionManager::new(relay.clone(), store.clone(), SessionConfig::default()).unwrap();
    let mut events = restarted.subscribe();
    let room = restarted
        .initialize_and_reconnect(DisconnectPolicy::Stay)
        .await
        .unwrap();
    settle().await;

    assert_eq!(room.unwrap().as_str(), ROOM);
    assert_eq!(restarted.matches(), vec!["Emma".to_string()]);
    let events = drain(&mut events);
    assert_eq!(
        events.first(),
        Some(&SessionEvent::MatchesUpdated {
            matches: vec!["Emma".to_string()]
        })
    );
    assert!(matches_found(&events).is_empty());
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_drop_resumes_sync() {
    let relay = MemoryRelay::with_seed(11);
    let (alice, bob) = connected_pair(&relay).await;

    relay.kill_topic(TOPIC);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(alice.room().unwrap().as_str(), ROOM);
    assert_eq!(relay.live_channels(TOPIC), 2);

    alice.notify_like("Emma");
    bob.notify_like("Emma");
    settle().await;

    assert_eq!(alice.status(), ConnectionStatus::Connected);
    assert_eq!(alice.matches(), vec!["Emma".to_string()]);
    assert_eq!(bob.matches(), vec!["Emma".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_gaps_strictly_increase_then_unavailable() {
    let relay = MemoryRelay::with_seed(11);
    let alice = new_session(&relay);
    let mut events = alice.subscribe();
    alice.join_room(ROOM).await.unwrap();

    relay.update_faults(|f| f.refuse_connects = true);
    let killed_at = tokio::time::Instant::now();
    relay.kill_topic(TOPIC);
    tokio::time::sleep(Duration::from_secs(300)).await;

    let attempts = relay.connect_attempts(TOPIC);
    let max_attempts = alice.config().reconnect.max_attempts as usize;
    assert_eq!(attempts.len(), 1 + max_attempts);

    let mut previous = killed_at;
    let mut gaps = Vec::new();
    for at in &attempts[1..] {
        gaps.push(*at - previous);
        previous = *at;
    }
    for pair in gaps.windows(2) {
        assert!(pair[0] < pair[1], "gaps not increasing: {:?}", gaps);
    }
    assert!(gaps.iter().all(|g| *g <= alice.config().reconnect.max_delay));

    let statuses: Vec<ConnectionStatus> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StatusChanged { status } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.last(), Some(&ConnectionStatus::Unavailable));
    assert!(!statuses.iter().any(|s| matches!(s, ConnectionStatus::Error(_))));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff_stops_retries() {
    let relay = MemoryRelay::with_seed(11);
    let alice = new_session(&relay);
    alice.join_room(ROOM).await.unwrap();

    relay.update_faults(|f| f.refuse_connects = true);
    relay.kill_topic(TOPIC);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let before = relay.connect_attempts(TOPIC).len();

    alice.disconnect(DisconnectPolicy::Stay).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(relay.connect_attempts(TOPIC).len(), before);
    assert_eq!(alice.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_stale_join_result_is_discarded() {
    let relay = MemoryRelay::with_seed(11);
    relay.update_faults(|f| f.hold_open = true);
    let alice = new_session(&relay);

    let first = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.join_room(ROOM).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    relay.update_faults(|f| f.hold_open = false);
    alice.join_room("zzz999").await.unwrap();
    relay.release_held(TOPIC);

    assert!(first.await.unwrap().is_err());
    assert_eq!(alice.room().unwrap().as_str(), "zzz999");
    assert_eq!(alice.status(), ConnectionStatus::InRoom);
    assert_eq!(relay.live_channels(TOPIC), 0);
}

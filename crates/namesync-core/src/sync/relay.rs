//! In-memory relay for tests and local simulation.
//!
//! `MemoryRelay` implements [`Transport`] with topic fan-out: every live
//! channel on a topic receives every frame published to it, including the
//! publisher's own channel. Fault knobs reproduce the behavior of a public
//! relay over a flaky network.
//!
//! ## Architecture
//!
//! ```text
//! publish("namesync-k3v9qa", msg)
//!   │
//!   └──→ WireFrame {event, topic, message}
//!        │
//!        ├──→ channel A  (maybe dropped, duplicated or delayed)
//!        └──→ channel B  (maybe dropped, duplicated or delayed)
//! ```
//!
//! Frames published while a topic has no live channel are discarded. A
//! delayed frame is overtaken by anything published after it, which is how
//! the relay reorders.
//!
//! The relay keeps a bounded per-topic history of publishes and connect
//! attempts for inspection; older entries are evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::envelope::WireFrame;
use super::transport::{ChannelEvent, ChannelHandle, Transport};
use crate::error::{SyncError, SyncResult};

/// Fault injection settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability that a frame is not delivered to a given channel
    pub drop_rate: f64,
    /// Probability that a delivered frame is delivered twice
    pub duplicate_rate: f64,
    /// Reject every `connect` call
    pub refuse_connects: bool,
    /// Accept `connect` but never report the channel as opened
    pub hold_open: bool,
    /// Reject every `publish` call
    pub fail_publishes: bool,
    /// Probability that a delivered frame is held back so later frames overtake it
    pub reorder_rate: f64,
    /// Held-back frames wait between this and twice this long (at least 1ms)
    pub reorder_delay: Duration,
}

/// Entries kept per topic in the publish and connect histories
pub const HISTORY_LIMIT: usize = 1024;

fn record<T>(history: &mut VecDeque<T>, entry: T) {
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(entry);
}

struct Subscriber {
    tx: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct RelayState {
    topics: HashMap<String, Vec<Subscriber>>,
    connect_attempts: HashMap<String, VecDeque<Instant>>,
    published: HashMap<String, VecDeque<String>>,
}

struct RelayInner {
    state: Mutex<RelayState>,
    faults: Mutex<FaultConfig>,
    rng: Mutex<StdRng>,
}

/// Shared in-memory relay. Clones talk to the same relay.
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<RelayInner>,
}

impl MemoryRelay {
    /// Create a relay with randomly seeded fault decisions
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Create a relay whose fault decisions are reproducible
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                state: Mutex::new(RelayState::default()),
                faults: Mutex::new(FaultConfig::default()),
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Replace the fault settings
    pub fn set_faults(&self, faults: FaultConfig) {
        *self.inner.faults.lock() = faults;
    }

    /// Update the fault settings in place
    pub fn update_faults(&self, f: impl FnOnce(&mut FaultConfig)) {
        f(&mut self.inner.faults.lock());
    }

    /// Current fault settings
    pub fn faults(&self) -> FaultConfig {
        self.inner.faults.lock().clone()
    }

    /// Close every live channel on `topic` as if the connection dropped
    pub fn kill_topic(&self, topic: &str) {
        let subscribers = self
            .inner
            .state
            .lock()
            .topics
            .remove(topic)
            .unwrap_or_default();
        debug!(topic, count = subscribers.len(), "Killing relay channels");
        for sub in subscribers {
            let _ = sub.tx.send(ChannelEvent::Closed("relay connection lost".to_string()));
        }
    }

    /// Report a transport error on every live channel of `topic`
    pub fn fail_topic(&self, topic: &str, error: &str) {
        let state = self.inner.state.lock();
        if let Some(subs) = state.topics.get(topic) {
            for sub in subs.iter().filter(|s| s.is_live()) {
                let _ = sub.tx.send(ChannelEvent::Error(error.to_string()));
            }
        }
    }

    /// Report `Opened` on channels of `topic` that were held back
    pub fn release_held(&self, topic: &str) {
        let state = self.inner.state.lock();
        if let Some(subs) = state.topics.get(topic) {
            for sub in subs.iter().filter(|s| s.is_live()) {
                let _ = sub.tx.send(ChannelEvent::Opened);
            }
        }
    }

    /// Deliver a raw frame string to every live channel of `topic`, bypassing faults
    pub fn inject_raw(&self, topic: &str, raw: impl Into<String>) {
        let raw = raw.into();
        let state = self.inner.state.lock();
        if let Some(subs) = state.topics.get(topic) {
            for sub in subs.iter().filter(|s| s.is_live()) {
                let _ = sub.tx.send(ChannelEvent::Message(raw.clone()));
            }
        }
    }

    /// Number of live channels on `topic`
    pub fn live_channels(&self, topic: &str) -> usize {
        let state = self.inner.state.lock();
        state
            .topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| s.is_live()).count())
            .unwrap_or(0)
    }

    /// Times at which `connect` was most recently called for `topic`
    pub fn connect_attempts(&self, topic: &str) -> Vec<Instant> {
        let state = self.inner.state.lock();
        state
            .connect_attempts
            .get(topic)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Most recent encoded envelopes accepted by `publish` for `topic`, in order
    pub fn published(&self, topic: &str) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .published
            .get(topic)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn roll(&self, probability: f64) -> bool {
        probability > 0.0 && self.inner.rng.lock().random_bool(probability.min(1.0))
    }

    fn reorder_delay(&self, base: Duration) -> Duration {
        let base_ms = (base.as_millis() as u64).max(1);
        Duration::from_millis(self.inner.rng.lock().random_range(base_ms..=base_ms * 2))
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryRelay {
    async fn connect(&self, topic: &str) -> SyncResult<ChannelHandle> {
        let faults = self.faults();
        let mut state = self.inner.state.lock();
        record(
            state.connect_attempts.entry(topic.to_string()).or_default(),
            Instant::now(),
        );

        if faults.refuse_connects {
            debug!(topic, "Relay refusing connection");
            return Err(SyncError::ConnectionFailed(format!(
                "relay refused connection to {}",
                topic
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        if !faults.hold_open {
            let _ = tx.send(ChannelEvent::Opened);
        }

        let subs = state.topics.entry(topic.to_string()).or_default();
        subs.retain(Subscriber::is_live);
        subs.push(Subscriber {
            tx,
            cancel: cancel.clone(),
        });
        debug!(topic, live = subs.len(), "Relay channel connected");

        Ok(ChannelHandle::new(rx, cancel))
    }

    async fn publish(&self, topic: &str, message: String) -> SyncResult<()> {
        let faults = self.faults();
        if faults.fail_publishes {
            return Err(SyncError::PublishFailed(format!(
                "relay rejected publish to {}",
                topic
            )));
        }

        let frame = WireFrame::message(topic, message.clone()).to_json()?;

        let mut state = self.inner.state.lock();
        record(state.published.entry(topic.to_string()).or_default(), message);

        let Some(subs) = state.topics.get_mut(topic) else {
            return Ok(());
        };
        subs.retain(Subscriber::is_live);

        for sub in subs.iter() {
            if self.roll(faults.drop_rate) {
                debug!(topic, "Relay dropped frame");
                continue;
            }
            if self.roll(faults.reorder_rate) {
                let delay = self.reorder_delay(faults.reorder_delay);
                debug!(topic, delay_ms = delay.as_millis() as u64, "Relay delayed frame");
                let tx = sub.tx.clone();
                let frame = frame.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(ChannelEvent::Message(frame));
                });
            } else {
                let _ = sub.tx.send(ChannelEvent::Message(frame.clone()));
            }
            if self.roll(faults.duplicate_rate) {
                debug!(topic, "Relay duplicated frame");
                let _ = sub.tx.send(ChannelEvent::Message(frame.clone()));
            }
        }
        Ok(())
    }
}

//! Session configuration
//!
//! Timing constants for batching, connecting and reconnecting, plus the
//! strings used to derive topics and share links.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay between the last like and the batch publish
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

/// Time allowed for a room channel to open
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix prepended to room codes to form relay topics
pub const DEFAULT_TOPIC_PREFIX: &str = "namesync-";

/// Base URL that share links point to
pub const DEFAULT_SHARE_BASE_URL: &str = "https://namesync.app/";

/// What a session does after leaving its room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Stay disconnected until the user joins or creates a room
    #[default]
    Stay,
    /// Create and join a fresh room right away
    NewRoom,
}

/// Exponential backoff with jitter for re-opening a dropped channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub base_delay: Duration,
    /// Ceiling no delay exceeds
    pub max_delay: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Random extra delay as a fraction of the computed delay, in `[0, 1)`
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 6,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), with random jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample = rand::rng().random::<f64>();
        self.jittered_delay(attempt, sample)
    }

    /// Delay before attempt `attempt` without jitter.
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before attempt `attempt` using `sample` in `[0, 1)` as the jitter draw
    pub fn jittered_delay(&self, attempt: u32, sample: f64) -> Duration {
        let delay = self.base_delay_for(attempt);
        let jitter = self.jitter.clamp(0.0, 0.99) * sample.clamp(0.0, 1.0);
        delay.mul_f64(1.0 + jitter).min(self.max_delay)
    }
}

/// Tunables for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Like batching delay
    pub debounce: Duration,
    /// Channel open timeout
    pub connect_timeout: Duration,
    /// Backoff for dropped channels
    pub reconnect: ReconnectPolicy,
    /// Prefix turning a room code into a relay topic
    pub topic_prefix: String,
    /// Base URL for share links
    pub share_base_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            share_base_url: DEFAULT_SHARE_BASE_URL.to_string(),
        }
    }
}

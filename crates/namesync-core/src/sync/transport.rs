//! Transport adapter boundary
//!
//! The relay is a topic-based fan-out pub/sub service. A session needs two
//! capabilities from it: open a channel that streams a topic's frames, and
//! publish an encoded envelope to a topic. Delivery is at-least-once at
//! best: frames may be lost, duplicated or reordered.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};

/// Lifecycle and data events emitted by an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is ready to receive
    Opened,
    /// A raw relay frame (JSON `WireFrame`)
    Message(String),
    /// The transport reported a problem; the channel may still close
    Error(String),
    /// The channel closed
    Closed(String),
}

/// Handle to one subscription on a topic
///
/// Owned by the session supervisor. Dropping or closing the handle cancels
/// the subscription on the transport side.
pub struct ChannelHandle {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Create a handle from a transport's event stream and close signal
    pub fn new(events: mpsc::UnboundedReceiver<ChannelEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Receive the next channel event.
    ///
    /// Returns None once the transport side has gone away.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Wait until the channel reports `Opened`.
    ///
    /// Frames arriving before the open notice are discarded.
    pub async fn wait_open(&mut self) -> SyncResult<()> {
        loop {
            match self.events.recv().await {
                Some(ChannelEvent::Opened) => return Ok(()),
                Some(ChannelEvent::Message(_)) => continue,
                Some(ChannelEvent::Error(e)) => return Err(SyncError::ChannelError(e)),
                Some(ChannelEvent::Closed(reason)) => {
                    return Err(SyncError::ConnectionFailed(format!(
                        "channel closed before opening: {}",
                        reason
                    )))
                }
                None => {
                    return Err(SyncError::ConnectionFailed(
                        "transport dropped channel".to_string(),
                    ))
                }
            }
        }
    }

    /// Token that closes this channel when cancelled
    pub fn close_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Close the channel
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Publish/subscribe capability a session runs on
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a channel streaming frames published to `topic`.
    ///
    /// The returned handle emits `Opened` once the subscription is live.
    async fn connect(&self, topic: &str) -> SyncResult<ChannelHandle>;

    /// Publish an encoded envelope to `topic`
    async fn publish(&self, topic: &str, message: String) -> SyncResult<()>;
}

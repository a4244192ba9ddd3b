//! Session status and event types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConnectionStatus: Room connection state                        │
//! │  ├── Disconnected: No room                                      │
//! │  ├── Connecting: Opening the room channel                       │
//! │  ├── InRoom: Channel open, partner not heard from yet           │
//! │  ├── Connected: Partner state received                          │
//! │  ├── Unavailable: Reconnect budget spent, room still valid      │
//! │  └── Error: Join or channel failed                              │
//! │                                                                 │
//! │  SessionEvent: Notifications for the UI                         │
//! │  ├── StatusChanged: Connection status transitioned              │
//! │  ├── MatchFound: An item newly entered the match set            │
//! │  ├── MatchesUpdated: The match set changed                      │
//! │  └── RoomChanged: Active room set or cleared                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::room::RoomCode;

/// Connection state of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No active room
    #[default]
    Disconnected,
    /// Opening the room channel
    Connecting,
    /// Joined, partner state not received yet
    InRoom,
    /// Partner state received at least once
    Connected,
    /// Reconnect attempts exhausted; the room is still valid
    Unavailable,
    /// Join or channel failed
    Error(String),
}

impl ConnectionStatus {
    /// Check if a room channel is currently open
    pub fn is_joined(&self) -> bool {
        matches!(self, ConnectionStatus::InRoom | ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::InRoom => write!(f, "In room"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Unavailable => write!(f, "Partner unavailable"),
            ConnectionStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Events emitted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection status transitioned
    StatusChanged {
        /// The new status
        status: ConnectionStatus,
    },
    /// An item newly entered the match set
    MatchFound {
        /// The matched item
        item: String,
    },
    /// The match set changed
    MatchesUpdated {
        /// Current matches in local like order
        matches: Vec<String>,
    },
    /// Active room was set or cleared
    RoomChanged {
        /// The new room, `None` after disconnect
        room: Option<RoomCode>,
    },
}

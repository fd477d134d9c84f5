//! Connection state, status snapshots and lifecycle events.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{Duration, SystemTime};

use serde_json::Value;
use uuid::Uuid;

use crate::identifiers::TransportId;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the connection manager.
///
/// ```text
/// Disconnected ──connect()──► Connecting ──open──► Connected
///      ▲                          │                    │
///      │                    close/error          close (≠1000)
///      │                          ▼                    │
///      └──── attempts spent ── Reconnecting ◄──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No link and nothing scheduled.
    #[default]
    Disconnected,
    /// Link is being opened.
    Connecting,
    /// Link is open.
    Connected,
    /// A connect attempt is scheduled.
    Reconnecting,
    /// Link is being closed on request.
    Closing,
}

impl ConnectionState {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        }
    }

    /// Returns `true` for `Connecting` and `Connected`.
    #[inline]
    #[must_use]
    pub const fn has_link(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Point-in-time snapshot of the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    /// Identity of this manager instance.
    pub client_id: Uuid,
    /// Current state.
    pub state: ConnectionState,
    /// `state == Connected`.
    pub is_connected: bool,
    /// `state == Connecting`.
    pub is_connecting: bool,
    /// Automatic attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Devices with at least one callback.
    pub subscriber_count: usize,
    /// Messages waiting in the outbound queue.
    pub queue_len: usize,
    /// Last heartbeat reply (or heartbeat start).
    pub last_heartbeat: Option<SystemTime>,
}

// ============================================================================
// ClientEvent
// ============================================================================

/// Kind of a recoverable fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Link could not be opened or failed.
    Connection,
    /// Inbound text was not valid JSON.
    Parse,
}

/// Payload delivered on the manager's event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// `ws:connected`
    Connected {
        /// The link that opened.
        transport: TransportId,
    },
    /// `ws:disconnected`
    Disconnected {
        /// Closure code.
        code: u16,
        /// Closure reason.
        reason: String,
    },
    /// `ws:error`
    Error {
        /// Fault category.
        kind: FaultKind,
        /// Description.
        message: String,
    },
    /// `ws:message` and `ws:message:<type>`
    Message(Value),
    /// `ws:reconnecting`
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// `ws:reconnect_failed`
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
}

impl ClientEvent {
    /// Returns the inbound frame for message events.
    #[inline]
    #[must_use]
    pub fn message(&self) -> Option<&Value> {
        match self {
            Self::Message(value) => Some(value),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_has_link() {
        assert!(ConnectionState::Connecting.has_link());
        assert!(ConnectionState::Connected.has_link());
        assert!(!ConnectionState::Reconnecting.has_link());
    }

    #[test]
    fn test_message_accessor() {
        let event = ClientEvent::Message(json!({"type": "pong"}));
        assert_eq!(event.message(), Some(&json!({"type": "pong"})));
        assert_eq!(ClientEvent::ReconnectFailed { attempts: 1 }.message(), None);
    }
}

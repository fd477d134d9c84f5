//! Gateway wire protocol.
//!
//! JSON text frames over one persistent socket. Every frame is an object
//! with a `type` tag.
//!
//! | type | Direction | Purpose |
//! |------|-----------|---------|
//! | `auth` | Client → Gateway | Credential after connect |
//! | `subscribe` | Client → Gateway | Request delivery for a device |
//! | `unsubscribe` | Client → Gateway | Stop delivery for a device |
//! | `heartbeat` | Client → Gateway | Liveness probe |
//! | `pong` | Gateway → Client | Heartbeat reply |
//! | `device_data` | Gateway → Client | Telemetry for one device |
//! | `connection_ack`, `error`, `subscribe_response` | Gateway → Client | Informational |
//!
//! Any inbound frame carrying a `device_id` is routed to that device's
//! subscribers, whatever its type.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Outbound and inbound frame types |
//! | `telemetry` | Typed device data payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound and inbound frame types.
pub mod frame;

/// Typed device telemetry payloads.
pub mod telemetry;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{InboundFrame, OutboundFrame, ParsedFrame};
pub use telemetry::{DataPoint, DataQuality, DeviceData, PointType};

// ============================================================================
// Frame Types
// ============================================================================

/// Values of the `type` tag.
pub mod frame_type {
    /// Credential frame.
    pub const AUTH: &str = "auth";
    /// Subscribe request.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Unsubscribe request.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Liveness probe.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Liveness reply.
    pub const PONG: &str = "pong";
    /// Device telemetry.
    pub const DEVICE_DATA: &str = "device_data";
    /// Connection acknowledgement.
    pub const CONNECTION_ACK: &str = "connection_ack";
    /// Gateway-side error report.
    pub const ERROR: &str = "error";
    /// Reply to a subscribe request.
    pub const SUBSCRIBE_RESPONSE: &str = "subscribe_response";
}

// ============================================================================
// Closure Codes
// ============================================================================

/// Standard socket closure codes.
///
/// Only [`NORMAL_CLOSURE`](close_code::NORMAL_CLOSURE) suppresses
/// auto-reconnect.
pub mod close_code {
    pub const NORMAL_CLOSURE: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    pub const NO_STATUS_RECEIVED: u16 = 1005;
    pub const ABNORMAL_CLOSURE: u16 = 1006;
    pub const INVALID_FRAME_PAYLOAD_DATA: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const MISSING_EXTENSION: u16 = 1010;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const SERVICE_RESTART: u16 = 1012;
    pub const TRY_AGAIN_LATER: u16 = 1013;
    pub const BAD_GATEWAY: u16 = 1014;

    /// Returns `true` if closing with this code should not trigger a reconnect.
    #[inline]
    #[must_use]
    pub const fn is_normal(code: u16) -> bool {
        code == NORMAL_CLOSURE
    }
}

// ============================================================================
// Channels
// ============================================================================

/// Event bus channel names used by the connection manager.
pub mod channel {
    /// Transport opened and the link is live.
    pub const CONNECTED: &str = "ws:connected";
    /// Live link closed.
    pub const DISCONNECTED: &str = "ws:disconnected";
    /// Recoverable fault (connection or parse error).
    pub const ERROR: &str = "ws:error";
    /// Every parsed inbound frame.
    pub const MESSAGE: &str = "ws:message";
    /// Reconnect scheduled.
    pub const RECONNECTING: &str = "ws:reconnecting";
    /// Reconnect attempts exhausted.
    pub const RECONNECT_FAILED: &str = "ws:reconnect_failed";

    /// Prefix of the per-type message channels.
    pub const MESSAGE_PREFIX: &str = "ws:message:";

    /// Returns the channel for inbound frames of one type.
    ///
    /// ```
    /// use telemetry_link::protocol::channel;
    ///
    /// assert_eq!(channel::message_type("device_data"), "ws:message:device_data");
    /// ```
    #[inline]
    #[must_use]
    pub fn message_type(frame_type: &str) -> String {
        format!("{MESSAGE_PREFIX}{frame_type}")
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Milliseconds since the Unix epoch, as carried in frame `timestamp` fields.
#[must_use]
pub fn timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

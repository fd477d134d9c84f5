//! Outbound and inbound frames.
//!
//! Outbound frames are a closed set and modelled as [`OutboundFrame`].
//! Inbound frames are kept as raw JSON in [`InboundFrame`] so that unknown
//! types still reach listeners untouched; [`InboundFrame::parse`] gives a
//! typed view of the recognized ones.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_str};

use crate::error::Result;
use crate::identifiers::DeviceId;

use super::telemetry::DeviceData;
use super::{frame_type, timestamp_millis};

// ============================================================================
// OutboundFrame
// ============================================================================

/// A frame sent from the client to the gateway.
///
/// # Format
///
/// ```json
/// { "type": "subscribe", "device_id": "7", "timestamp": 1700000000000, "reconnect": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Credential sent right after the socket opens.
    Auth {
        /// Opaque token from the token source.
        token: String,
        /// Send time in epoch milliseconds.
        timestamp: u64,
    },

    /// Request delivery of a device's frames.
    Subscribe {
        /// Canonical device id.
        device_id: DeviceId,
        /// Send time in epoch milliseconds.
        timestamp: u64,
        /// Set when re-announcing after a reconnect.
        #[serde(default, skip_serializing_if = "is_false")]
        reconnect: bool,
        /// Set on the delayed confirmation re-send.
        #[serde(default, skip_serializing_if = "is_false")]
        confirm: bool,
    },

    /// Stop delivery of a device's frames.
    Unsubscribe {
        /// Canonical device id.
        device_id: DeviceId,
        /// Send time in epoch milliseconds.
        timestamp: u64,
    },

    /// Liveness probe.
    Heartbeat {
        /// Send time in epoch milliseconds.
        timestamp: u64,
    },
}

#[inline]
fn is_false(flag: &bool) -> bool {
    !*flag
}

impl OutboundFrame {
    /// Creates an auth frame.
    #[inline]
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            token: token.into(),
            timestamp: timestamp_millis(),
        }
    }

    /// Creates a fresh subscribe frame.
    #[inline]
    #[must_use]
    pub fn subscribe(device_id: DeviceId) -> Self {
        Self::Subscribe {
            device_id,
            timestamp: timestamp_millis(),
            reconnect: false,
            confirm: false,
        }
    }

    /// Creates a subscribe frame re-announced after a reconnect.
    #[inline]
    #[must_use]
    pub fn resubscribe(device_id: DeviceId) -> Self {
        Self::Subscribe {
            device_id,
            timestamp: timestamp_millis(),
            reconnect: true,
            confirm: false,
        }
    }

    /// Creates the delayed confirmation re-send of a subscribe frame.
    #[inline]
    #[must_use]
    pub fn confirm_subscribe(device_id: DeviceId) -> Self {
        Self::Subscribe {
            device_id,
            timestamp: timestamp_millis(),
            reconnect: false,
            confirm: true,
        }
    }

    /// Creates an unsubscribe frame.
    #[inline]
    #[must_use]
    pub fn unsubscribe(device_id: DeviceId) -> Self {
        Self::Unsubscribe {
            device_id,
            timestamp: timestamp_millis(),
        }
    }

    /// Creates a heartbeat probe.
    #[inline]
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: timestamp_millis(),
        }
    }

    /// Returns the `type` tag.
    #[must_use]
    pub const fn frame_type(&self) -> &'static str {
        match self {
            Self::Auth { .. } => frame_type::AUTH,
            Self::Subscribe { .. } => frame_type::SUBSCRIBE,
            Self::Unsubscribe { .. } => frame_type::UNSUBSCRIBE,
            Self::Heartbeat { .. } => frame_type::HEARTBEAT,
        }
    }

    /// Returns the device this frame concerns, if any.
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::Subscribe { device_id, .. } | Self::Unsubscribe { device_id, .. } => {
                Some(device_id)
            }
            Self::Auth { .. } | Self::Heartbeat { .. } => None,
        }
    }
}

// ============================================================================
// InboundFrame
// ============================================================================

/// A frame received from the gateway, parsed once.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    value: Value,
}

impl InboundFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the text is not JSON.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(Self {
            value: from_str(text)?,
        })
    }

    /// Wraps an already-parsed value.
    #[inline]
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self { value }
    }

    /// Returns the `type` tag, if it is a string.
    #[inline]
    #[must_use]
    pub fn frame_type(&self) -> Option<&str> {
        self.value.get("type").and_then(Value::as_str)
    }

    /// Returns `true` for a heartbeat reply.
    #[inline]
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.frame_type() == Some(frame_type::PONG)
    }

    /// Returns the canonical device id, if the frame carries one.
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> Option<DeviceId> {
        self.value.get("device_id").and_then(DeviceId::from_value)
    }

    /// Returns the raw payload.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the frame, returning the raw payload.
    #[inline]
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Parses the frame into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedFrame {
        match self.frame_type() {
            Some(frame_type::PONG) => ParsedFrame::Pong {
                timestamp: self.get_u64("timestamp"),
            },

            Some(frame_type::DEVICE_DATA) => {
                match serde_json::from_value::<DeviceData>(self.value.clone()) {
                    Ok(data) => ParsedFrame::DeviceData(data),
                    Err(_) => self.unknown(),
                }
            }

            Some(frame_type::CONNECTION_ACK) => ParsedFrame::ConnectionAck {
                message: self.get_optional_string("message"),
            },

            Some(frame_type::ERROR) => ParsedFrame::Error {
                message: self
                    .get_optional_string("message")
                    .or_else(|| self.get_optional_string("error"))
                    .unwrap_or_default(),
            },

            Some(frame_type::SUBSCRIBE_RESPONSE) => ParsedFrame::SubscribeResponse {
                success: self
                    .value
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                message: self.get_optional_string("message"),
                device_id: self.device_id(),
            },

            _ => self.unknown(),
        }
    }

    fn unknown(&self) -> ParsedFrame {
        ParsedFrame::Unknown {
            frame_type: self.frame_type().map(str::to_string),
            payload: self.value.clone(),
        }
    }

    /// Gets an optional string field.
    #[inline]
    fn get_optional_string(&self, key: &str) -> Option<String> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Gets a u64 field, defaulting to zero.
    #[inline]
    fn get_u64(&self, key: &str) -> u64 {
        self.value
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }
}

// ============================================================================
// ParsedFrame
// ============================================================================

/// Typed view of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    /// Heartbeat reply.
    Pong {
        /// Gateway timestamp, zero if absent.
        timestamp: u64,
    },

    /// Device telemetry.
    DeviceData(DeviceData),

    /// Connection acknowledgement.
    ConnectionAck {
        /// Optional greeting.
        message: Option<String>,
    },

    /// Gateway-side error report.
    Error {
        /// Error description.
        message: String,
    },

    /// Reply to a subscribe request.
    SubscribeResponse {
        /// Whether the gateway accepted the subscription.
        success: bool,
        /// Optional detail.
        message: Option<String>,
        /// Device the reply concerns.
        device_id: Option<DeviceId>,
    },

    /// Anything else, including malformed known types.
    Unknown {
        /// The `type` tag, if present.
        frame_type: Option<String>,
        /// The raw payload.
        payload: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================

//! Telemetry Link - real-time device telemetry over one multiplexed WebSocket.
//!
//! This library keeps a single persistent connection to a telemetry gateway
//! and multiplexes any number of per-device subscriptions over it.
//!
//! # Architecture
//!
//! - **Connection manager**: owns the socket, reconnects with exponential
//!   backoff, authenticates and re-announces subscriptions after every open
//! - **Outbound queue**: bounded buffer for messages sent while offline,
//!   flushed once the link is back
//! - **Heartbeat**: periodic probe; a missing `pong` forces a reconnect
//! - **Event bus**: named lifecycle channels (`ws:connected`,
//!   `ws:disconnected`, `ws:message:<type>`, ...)
//!
//! Key design principles:
//!
//! - Callbacks never run under the manager's lock, so they may call back in
//! - A panicking callback is logged and isolated from its siblings
//! - All timers belong to one event loop per manager; stale firings are ignored
//!
//! # Quick Start
//!
//! ```no_run
//! use telemetry_link::{ConnectionManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ConnectionManager::builder()
//!         .url("ws://gateway.local/ws")
//!         .build()?;
//!
//!     let subscription = manager.subscribe("boiler-7", |frame| {
//!         println!("telemetry: {frame}");
//!     })?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     subscription.unsubscribe();
//!     manager.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`ConnectionManager`], [`DeviceMonitor`], queue and registry |
//! | [`config`] | [`ClientOptions`] and retry/heartbeat policies |
//! | [`auth`] | Token sources for the `auth` frame |
//! | [`events`] | [`EventBus`] and [`Handler`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Gateway frame types |
//! | [`transport`] | Transport abstraction and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Token sources for gateway authentication.
pub mod auth;

/// Connection manager, subscriptions and device monitors.
///
/// - [`ConnectionManager`] - Owns the gateway connection
/// - [`Subscription`] - Handle to one device callback
/// - [`DeviceMonitor`] - Latest-value view of one device
pub mod client;

/// Client options and policies.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Named-channel publish/subscribe.
pub mod events;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Gateway wire protocol.
pub mod protocol;

/// Transport layer.
///
/// The [`transport::Transport`] trait lets the manager run over anything
/// that carries text frames; [`transport::WebSocketTransport`] is the default.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    ClientEvent, ConnectionManager, ConnectionManagerBuilder, ConnectionState, DeviceMonitor,
    FaultKind, Status, Subscription,
};

// Configuration
pub use config::{ClientOptions, HeartbeatPolicy, ReconnectOrder, ReconnectPolicy, ResubscribePolicy};

// Error types
pub use error::{Error, Result};

// Events
pub use events::{EventBus, Handler};

// Identifier types
pub use identifiers::{DeviceId, ListenerId, TransportId};

// Protocol types
pub use protocol::{DataPoint, DataQuality, DeviceData, PointType};

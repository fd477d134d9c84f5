//! Connection lifecycle and subscription multiplexing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── ConnectionManager ────────────────────────┐
//! │                                                                   │
//! │  public calls ──► Mutex<Core> ◄── event loop ◄── LoopEvent queue  │
//! │                     │                             ▲      ▲        │
//! │     OutboundQueue ──┤                             │      │        │
//! │  HeartbeatMonitor ──┤                     transport    timers     │
//! │ SubscriptionRegistry┘                       sink                  │
//! │                                                                   │
//! │  after unlock: device callbacks, EventBus<ClientEvent> listeners  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manager` | [`ConnectionManager`] and [`Subscription`] |
//! | `builder` | [`ConnectionManagerBuilder`] |
//! | `queue` | [`OutboundQueue`] |
//! | `registry` | [`SubscriptionRegistry`] |
//! | `heartbeat` | Liveness probing |
//! | `status` | [`ConnectionState`], [`Status`], [`ClientEvent`] |
//! | `monitor` | [`DeviceMonitor`] |

// ============================================================================
// Submodules
// ============================================================================

/// Connection manager builder.
pub mod builder;

/// Connection manager and subscription handles.
pub mod manager;

/// Latest-value device monitor.
pub mod monitor;

/// Bounded outbound queue.
pub mod queue;

/// Device subscription registry.
pub mod registry;

/// State, status and lifecycle events.
pub mod status;

pub(crate) mod event_loop;
pub(crate) mod heartbeat;
pub(crate) mod timer;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionManagerBuilder;
pub use manager::{ConnectionManager, Subscription};
pub use monitor::DeviceMonitor;
pub use queue::{OutboundQueue, QueuedMessage};
pub use registry::{DeviceHandler, Removal, SubscriptionRegistry};
pub use status::{ClientEvent, ConnectionState, FaultKind, Status};

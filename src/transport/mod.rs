//! Socket transport seam.
//!
//! The connection manager never touches a socket directly. It asks a
//! [`Transport`] to open a link, keeps the returned [`TransportHandle`] for
//! writing, and learns about everything else through [`TransportEvent`]s
//! delivered via the [`TransportSink`] it handed over.
//!
//! ```text
//! ┌───────────────────┐   open(url, sink)   ┌──────────────────┐
//! │ ConnectionManager │────────────────────►│    Transport     │
//! │                   │◄──── handle ────────│                  │
//! │   (event loop)    │                     │  socket task     │
//! │                   │◄── TransportEvent ──│  (sink.emit)     │
//! └───────────────────┘                     └──────────────────┘
//! ```
//!
//! Every link gets its own [`TransportId`]; events carry it so that late
//! events from a link the manager already abandoned are recognized and
//! ignored.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | `tokio-tungstenite` client transport |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket client transport.
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use websocket::WebSocketTransport;

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::client::event_loop::LoopEvent;
use crate::error::Result;
use crate::identifiers::TransportId;

// ============================================================================
// TransportEvent
// ============================================================================

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is open and writable.
    Open,
    /// A text frame arrived.
    Frame(String),
    /// The link reported an error. A `Close` follows.
    Error(String),
    /// The link is gone.
    Close {
        /// Closure code (1000 is a normal closure).
        code: u16,
        /// Closure reason, possibly empty.
        reason: String,
    },
}

// ============================================================================
// Traits
// ============================================================================

/// Opens links to the gateway.
pub trait Transport: Send + Sync + 'static {
    /// Starts opening a link.
    ///
    /// Must not block: the actual connect happens in the background and is
    /// reported through `sink` as [`TransportEvent::Open`] or
    /// [`TransportEvent::Close`].
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot even be attempted.
    fn open(&self, url: &Url, sink: TransportSink) -> Result<Box<dyn TransportHandle>>;
}

/// Write side of an opened link.
///
/// Dropping the handle abandons the link.
pub trait TransportHandle: Send + Sync {
    /// Queues a text frame for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is not writable.
    fn send_text(&self, text: String) -> Result<()>;

    /// Returns `true` while frames can be written.
    fn is_writable(&self) -> bool;

    /// Closes the link with a code and reason.
    fn close(&self, code: u16, reason: &str);
}

// ============================================================================
// TransportSink
// ============================================================================

/// Reports link events back to the manager that opened the link.
#[derive(Debug, Clone)]
pub struct TransportSink {
    id: TransportId,
    tx: mpsc::UnboundedSender<LoopEvent>,
    runtime: Handle,
}

impl TransportSink {
    pub(crate) fn new(
        id: TransportId,
        tx: mpsc::UnboundedSender<LoopEvent>,
        runtime: Handle,
    ) -> Self {
        Self { id, tx, runtime }
    }

    /// Returns the id of the link this sink reports for.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Delivers an event. Returns `false` if the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        trace!(transport = %self.id, ?event, "Transport event");
        self.tx
            .send(LoopEvent::Transport { id: self.id, event })
            .is_ok()
    }

    /// Reports that the link opened.
    #[inline]
    pub fn opened(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    /// Reports an inbound text frame.
    #[inline]
    pub fn frame(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Frame(text.into()))
    }

    /// Reports a link error.
    #[inline]
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(message.into()))
    }

    /// Reports that the link closed.
    #[inline]
    pub fn closed(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Close {
            code,
            reason: reason.into(),
        })
    }

    /// Returns `true` if the manager stopped listening.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Runs a link task on the manager's runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }
}

//! Named-event publish/subscribe primitive.
//!
//! [`EventBus`] knows nothing about connections or devices: it maps channel
//! names to sets of [`Handler`]s and fans a payload out to them.
//!
//! # Dispatch Rules
//!
//! - `emit` copies the channel's handlers before calling any of them, so a
//!   handler may call `on`/`off`/`once` on the same bus while it runs.
//! - A panicking handler is caught and logged; the remaining handlers
//!   still run.
//! - Membership is by [`ListenerId`]: registering a clone of the same
//!   handler twice is a no-op.
//!
//! # Example
//!
//! ```
//! use telemetry_link::events::EventBus;
//!
//! let bus: EventBus<u32> = EventBus::new();
//! let id = bus.on("tick", |n| println!("tick {n}"));
//! assert_eq!(bus.emit("tick", &1), 1);
//! bus.off("tick", id);
//! assert_eq!(bus.emit("tick", &2), 0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use crate::identifiers::ListenerId;

// ============================================================================
// Types
// ============================================================================

/// Channel name to registered handlers.
type ChannelMap<T> = FxHashMap<String, Vec<Handler<T>>>;

// ============================================================================
// Handler
// ============================================================================

/// A shareable callback with a stable identity.
///
/// Clones share the same [`ListenerId`], which is what registries and the
/// bus use to decide membership.
pub struct Handler<T> {
    id: ListenerId,
    callback: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("id", &self.id).finish()
    }
}

impl<T> PartialEq for Handler<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handler<T> {}

impl<T> Handler<T> {
    /// Wraps a closure with a fresh identity.
    #[inline]
    #[must_use]
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self::with_id(ListenerId::next(), callback)
    }

    /// Wraps a closure under an existing identity.
    #[inline]
    pub(crate) fn with_id<F>(id: ListenerId, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            id,
            callback: Arc::new(callback),
        }
    }

    /// Returns the handler's identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Invokes the callback directly. Panics propagate.
    #[inline]
    pub fn call(&self, payload: &T) {
        (self.callback)(payload);
    }

    /// Invokes the callback, catching and logging a panic.
    ///
    /// Returns `false` if the callback panicked.
    pub(crate) fn call_isolated(&self, payload: &T, context: &str) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(payload))) {
            Ok(()) => true,
            Err(panic) => {
                error!(
                    listener = %self.id,
                    context,
                    panic = %panic_message(panic.as_ref()),
                    "Callback panicked"
                );
                false
            }
        }
    }
}

/// Extracts a readable message from a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Named channels, each a set of handlers.
///
/// Cloning the bus yields another handle to the same channels.
pub struct EventBus<T> {
    channels: Arc<Mutex<ChannelMap<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            channels: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = self.channels.lock();
        f.debug_struct("EventBus")
            .field("channels", &channels.len())
            .finish()
    }
}

impl<T: 'static> EventBus<T> {
    /// Creates an empty bus.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure on a channel.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_handler(event, Handler::new(callback))
    }

    /// Registers a handler on a channel.
    ///
    /// Registering a handler whose id is already on the channel is a no-op.
    pub fn on_handler(&self, event: &str, handler: Handler<T>) -> ListenerId {
        let id = handler.id();
        let mut channels = self.channels.lock();
        let handlers = channels.entry(event.to_string()).or_default();

        if !handlers.iter().any(|h| h.id() == id) {
            handlers.push(handler);
            trace!(event, listener = %id, "Listener added");
        }

        id
    }

    /// Registers a closure that runs for at most one emission.
    ///
    /// The handler is removed before the closure is invoked.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        let fired = AtomicBool::new(false);
        let channels: Weak<Mutex<ChannelMap<T>>> = Arc::downgrade(&self.channels);
        let name = event.to_string();

        let handler = Handler::with_id(id, move |payload: &T| {
            if fired.swap(true, Ordering::AcqRel) {
                return;
            }
            if let Some(channels) = channels.upgrade() {
                remove_listener(&mut channels.lock(), &name, id);
            }
            callback(payload);
        });

        self.on_handler(event, handler)
    }

    /// Removes a listener from a channel.
    ///
    /// Returns `true` if it was registered. Empty channels are dropped.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        remove_listener(&mut self.channels.lock(), event, id)
    }

    /// Delivers a payload to every handler on a channel.
    ///
    /// Returns the number of handlers invoked (including ones that panicked).
    pub fn emit(&self, event: &str, payload: &T) -> usize {
        let snapshot: Vec<Handler<T>> = match self.channels.lock().get(event) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        for handler in &snapshot {
            handler.call_isolated(payload, event);
        }

        snapshot.len()
    }

    /// Removes every listener on every channel.
    pub fn clear(&self) {
        self.channels.lock().clear();
    }

    /// Returns the number of listeners on a channel.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.channels.lock().get(event).map_or(0, Vec::len)
    }

    /// Returns `true` if the channel has at least one listener.
    #[inline]
    #[must_use]
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }
}

/// Removes a listener and prunes the channel if it became empty.
fn remove_listener<T>(channels: &mut ChannelMap<T>, event: &str, id: ListenerId) -> bool {
    let Some(handlers) = channels.get_mut(event) else {
        return false;
    };

    let before = handlers.len();
    handlers.retain(|h| h.id() != id);
    let removed = handlers.len() != before;

    if handlers.is_empty() {
        channels.remove(event);
    }

    removed
}

// ============================================================================
// Tests
// ============================================================================

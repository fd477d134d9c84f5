//! Device subscriptions.
//!
//! Maps each [`DeviceId`] to the callbacks interested in it. An entry
//! exists only while it has at least one callback. The registry also
//! remembers whether an entry has been announced to the gateway at least
//! once, which decides how it is flagged on the next announcement.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::events::Handler;
use crate::identifiers::{DeviceId, ListenerId};

// ============================================================================
// Types
// ============================================================================

/// Callback receiving every frame routed to a device.
pub type DeviceHandler = Handler<Value>;

/// Result of removing a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The callback was not registered for that device.
    NotFound,
    /// Removed; other callbacks remain.
    Removed,
    /// Removed and it was the last one; the entry is gone.
    EntryRemoved,
}

#[derive(Debug, Default)]
struct Entry {
    handlers: Vec<DeviceHandler>,
    announced: bool,
}

// ============================================================================
// SubscriptionRegistry
// ============================================================================

/// Device id to callbacks.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: FxHashMap<DeviceId, Entry>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback. Returns `false` if it was already registered.
    pub fn subscribe(&mut self, device_id: DeviceId, handler: DeviceHandler) -> bool {
        let entry = self.entries.entry(device_id.clone()).or_default();
        if entry.handlers.iter().any(|h| h.id() == handler.id()) {
            trace!(device = %device_id, "Callback already subscribed");
            return false;
        }

        entry.handlers.push(handler);
        debug!(device = %device_id, callbacks = entry.handlers.len(), "Subscribed");
        true
    }

    /// Removes a callback, dropping the entry when it becomes empty.
    pub fn unsubscribe(&mut self, device_id: &DeviceId, listener: ListenerId) -> Removal {
        let Some(entry) = self.entries.get_mut(device_id) else {
            return Removal::NotFound;
        };

        let before = entry.handlers.len();
        entry.handlers.retain(|h| h.id() != listener);
        if entry.handlers.len() == before {
            return Removal::NotFound;
        }

        if entry.handlers.is_empty() {
            self.entries.remove(device_id);
            debug!(device = %device_id, "Last callback removed");
            Removal::EntryRemoved
        } else {
            Removal::Removed
        }
    }

    /// Copies a device's callbacks for dispatch outside any lock.
    #[must_use]
    pub fn snapshot(&self, device_id: &DeviceId) -> Vec<DeviceHandler> {
        self.entries
            .get(device_id)
            .map(|e| e.handlers.clone())
            .unwrap_or_default()
    }

    /// Invokes callbacks in order. A panicking callback is logged and
    /// skipped. Returns the number invoked.
    pub fn dispatch(handlers: &[DeviceHandler], device_id: &DeviceId, frame: &Value) -> usize {
        for handler in handlers {
            handler.call_isolated(frame, device_id.as_str());
        }
        handlers.len()
    }

    /// Every device with at least one callback, with its announced flag.
    #[must_use]
    pub fn active_devices(&self) -> Vec<(DeviceId, bool)> {
        let mut devices: Vec<(DeviceId, bool)> = self
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.announced))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));
        devices
    }

    /// Records that a subscribe frame was sent for a device.
    pub fn mark_announced(&mut self, device_id: &DeviceId) {
        if let Some(entry) = self.entries.get_mut(device_id) {
            entry.announced = true;
        }
    }

    /// Returns `true` if the device was announced at least once.
    #[must_use]
    pub fn is_announced(&self, device_id: &DeviceId) -> bool {
        self.entries.get(device_id).is_some_and(|e| e.announced)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.entries.contains_key(device_id)
    }

    /// Number of devices with callbacks.
    #[inline]
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of callbacks for a device.
    #[must_use]
    pub fn listener_count(&self, device_id: &DeviceId) -> usize {
        self.entries.get(device_id).map_or(0, |e| e.handlers.len())
    }

    /// Removes everything, returning the devices that had entries.
    pub fn clear(&mut self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.entries.drain().map(|(id, _)| id).collect();
        devices.sort();
        devices
    }
}

// ============================================================================
// Tests
// ============================================================================

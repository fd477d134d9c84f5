//! Bounded outbound queue.
//!
//! Messages that cannot be written right away wait here until the next
//! successful connect. When full, the oldest message is evicted so the
//! newest data always gets through.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::SystemTime;

use serde_json::Value;
use tracing::warn;

use crate::config::DEFAULT_QUEUE_CAPACITY;

// ============================================================================
// QueuedMessage
// ============================================================================

/// A message waiting for a writable link.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// The message body.
    pub payload: Value,
    /// When it was queued.
    pub queued_at: SystemTime,
}

impl QueuedMessage {
    /// Wraps a payload, stamped with the current time.
    #[inline]
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            queued_at: SystemTime::now(),
        }
    }
}

// ============================================================================
// OutboundQueue
// ============================================================================

/// FIFO of pending messages with drop-oldest overflow.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl OutboundQueue {
    /// Creates an empty queue. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
            capacity,
        }
    }

    /// Appends a message, evicting the oldest one if the queue is full.
    ///
    /// Returns the evicted message, if any.
    pub fn enqueue(&mut self, payload: Value) -> Option<QueuedMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };

        if evicted.is_some() {
            warn!(capacity = self.capacity, "Outbound queue full, dropping oldest message");
        }

        self.items.push_back(QueuedMessage::new(payload));
        evicted
    }

    /// Takes every queued message, oldest first.
    ///
    /// Callers re-enqueue what they fail to send; those go to the back of
    /// the now-empty queue, so one drain is one pass.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.items.drain(..).collect()
    }

    /// Discards everything.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of queued messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates queued messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

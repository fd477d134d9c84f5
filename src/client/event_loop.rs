//! Single-consumer event loop.
//!
//! Transport events and timer firings from every source land in one
//! unbounded channel and are handled strictly in arrival order by one
//! task, so the manager's state never sees two of them at once.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Weak;

use tokio::sync::mpsc;
use tracing::debug;

use crate::identifiers::{DeviceId, TransportId};
use crate::transport::TransportEvent;

use super::manager::Shared;

// ============================================================================
// LoopEvent
// ============================================================================

/// Input to the manager's event loop.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    /// Something happened on a link.
    Transport {
        id: TransportId,
        event: TransportEvent,
    },
    /// A timer fired.
    Timer { id: u64, kind: TimerKind },
}

/// What a timer was armed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Scheduled connect attempt.
    Reconnect,
    /// Heartbeat probe period.
    HeartbeatTick,
    /// Heartbeat reply deadline.
    HeartbeatTimeout,
    /// Post-connect resubscribe after the grace period.
    Resubscribe,
    /// Confirmation re-send of a live subscribe.
    ConfirmSubscribe(DeviceId),
}

// ============================================================================
// Loop
// ============================================================================

/// Runs until every sender is gone or the manager is dropped.
pub(crate) async fn run(shared: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<LoopEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_event(event);
    }

    debug!("Event loop terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    fn timer_event() -> LoopEvent {
        LoopEvent::Timer {
            id: 1,
            kind: TimerKind::Reconnect,
        }
    }

    #[test]
    fn test_waits_for_events() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut event_loop = task::spawn(run(Weak::new(), rx));
        assert_pending!(event_loop.poll());
    }

    #[test]
    fn test_stops_when_manager_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut event_loop = task::spawn(run(Weak::new(), rx));
        assert_pending!(event_loop.poll());

        tx.send(timer_event()).expect("loop alive");
        assert!(event_loop.is_woken());
        assert_ready!(event_loop.poll());
    }

    #[test]
    fn test_stops_when_senders_gone() {
        let (tx, rx) = mpsc::unbounded_channel::<LoopEvent>();
        let mut event_loop = task::spawn(run(Weak::new(), rx));
        assert_pending!(event_loop.poll());

        drop(tx);
        assert_ready!(event_loop.poll());
    }
}

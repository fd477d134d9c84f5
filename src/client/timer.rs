//! Cancellable timers feeding the event loop.
//!
//! A timer is a spawned task that sleeps and then posts a
//! [`LoopEvent::Timer`]. Its [`TimerSlot`] aborts the task on drop, and
//! every firing carries the slot's id: the loop acts on a firing only if
//! the matching slot is still armed, which covers a timer that fired just
//! before being cancelled.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};

use crate::identifiers::TransportId;
use crate::transport::TransportSink;

use super::event_loop::{LoopEvent, TimerKind};

// ============================================================================
// TimerSlot
// ============================================================================

/// An armed timer. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct TimerSlot {
    id: u64,
    handle: JoinHandle<()>,
}

impl TimerSlot {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Returns `true` if `slot` is armed with timer `id`.
#[inline]
pub(crate) fn is_armed(slot: &Option<TimerSlot>, id: u64) -> bool {
    slot.as_ref().is_some_and(|s| s.id() == id)
}

// ============================================================================
// Scheduler
// ============================================================================

/// Arms timers and hands out transport sinks on the manager's runtime.
#[derive(Debug, Clone)]
pub(crate) struct Scheduler {
    tx: mpsc::UnboundedSender<LoopEvent>,
    runtime: Handle,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    pub(crate) fn new(tx: mpsc::UnboundedSender<LoopEvent>, runtime: Handle) -> Self {
        Self {
            tx,
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fires `kind` once after `delay`.
    pub(crate) fn after(&self, delay: Duration, kind: TimerKind) -> TimerSlot {
        let id = self.next_id();
        let tx = self.tx.clone();

        let handle = self.runtime.spawn(async move {
            sleep(delay).await;
            let _ = tx.send(LoopEvent::Timer { id, kind });
        });

        TimerSlot { id, handle }
    }

    /// Fires `kind` every `period`, first after one full period.
    pub(crate) fn every(&self, period: Duration, kind: TimerKind) -> TimerSlot {
        let id = self.next_id();
        let tx = self.tx.clone();

        let handle = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx
                    .send(LoopEvent::Timer {
                        id,
                        kind: kind.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        TimerSlot { id, handle }
    }

    /// Creates the sink for a new link.
    pub(crate) fn sink(&self, id: TransportId) -> TransportSink {
        TransportSink::new(id, self.tx.clone(), self.runtime.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (Scheduler, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Scheduler::new(tx, Handle::current()), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once() {
        let (scheduler, mut rx) = scheduler();
        let slot = scheduler.after(Duration::from_secs(1), TimerKind::Reconnect);

        match rx.recv().await {
            Some(LoopEvent::Timer { id, kind }) => {
                assert_eq!(id, slot.id());
                assert_eq!(kind, TimerKind::Reconnect);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_slot_never_fires() {
        let (scheduler, mut rx) = scheduler();
        let slot = scheduler.after(Duration::from_secs(1), TimerKind::Reconnect);
        drop(slot);

        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_repeats() {
        let (scheduler, mut rx) = scheduler();
        let _slot = scheduler.every(Duration::from_secs(1), TimerKind::HeartbeatTick);

        sleep(Duration::from_millis(3500)).await;
        let mut ticks = 0;
        while rx.try_recv().is_ok() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
    }

    #[tokio::test]
    async fn test_ids_are_distinct() {
        let (scheduler, _rx) = scheduler();
        let a = scheduler.after(Duration::from_secs(60), TimerKind::Resubscribe);
        let b = scheduler.after(Duration::from_secs(60), TimerKind::Resubscribe);
        assert_ne!(a.id(), b.id());

        let slot = Some(a);
        assert!(is_armed(&slot, slot.as_ref().map_or(0, TimerSlot::id)));
        assert!(!is_armed(&slot, b.id()));
        assert!(!is_armed(&None, b.id()));
    }
}

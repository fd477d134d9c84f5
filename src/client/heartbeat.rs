//! Liveness probing.
//!
//! While connected, a probe is due every interval. Each probe arms a reply
//! deadline unless one is already outstanding; a `pong` disarms it. A
//! deadline that expires means the link is dead even if the socket has not
//! noticed yet.

// ============================================================================
// Imports
// ============================================================================

use std::time::SystemTime;

use tracing::{debug, trace};

use crate::config::HeartbeatPolicy;

use super::event_loop::TimerKind;
use super::timer::{Scheduler, TimerSlot, is_armed};

// ============================================================================
// HeartbeatMonitor
// ============================================================================

/// Probe timer, reply deadline and last-reply time.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    policy: HeartbeatPolicy,
    interval: Option<TimerSlot>,
    deadline: Option<TimerSlot>,
    last_heartbeat: Option<SystemTime>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(policy: HeartbeatPolicy) -> Self {
        Self {
            policy,
            interval: None,
            deadline: None,
            last_heartbeat: None,
        }
    }

    /// Starts probing, restarting any previous cycle.
    pub(crate) fn start(&mut self, scheduler: &Scheduler) {
        self.stop();
        if !self.policy.enabled {
            return;
        }

        self.last_heartbeat = Some(SystemTime::now());
        self.interval = Some(scheduler.every(self.policy.interval, TimerKind::HeartbeatTick));
        debug!(interval_ms = self.policy.interval.as_millis() as u64, "Heartbeat started");
    }

    /// Cancels the probe timer and any outstanding deadline.
    pub(crate) fn stop(&mut self) {
        if self.interval.take().is_some() {
            debug!("Heartbeat stopped");
        }
        self.deadline = None;
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Handles a probe tick.
    ///
    /// Returns `true` if timer `id` is the live probe timer and a probe
    /// should be sent.
    pub(crate) fn on_tick(&mut self, id: u64, scheduler: &Scheduler) -> bool {
        if !is_armed(&self.interval, id) {
            return false;
        }

        if self.deadline.is_none() {
            self.deadline = Some(scheduler.after(self.policy.timeout, TimerKind::HeartbeatTimeout));
        }
        trace!("Heartbeat probe due");
        true
    }

    /// Records a reply, disarming the deadline.
    pub(crate) fn on_pong(&mut self) {
        self.deadline = None;
        self.last_heartbeat = Some(SystemTime::now());
    }

    /// Handles a deadline expiry.
    ///
    /// Returns `true` if timer `id` is the outstanding deadline.
    pub(crate) fn on_deadline(&mut self, id: u64) -> bool {
        if !is_armed(&self.deadline, id) {
            return false;
        }
        self.deadline = None;
        true
    }

    /// Time of the last reply (or of the last start).
    #[inline]
    pub(crate) fn last_heartbeat(&self) -> Option<SystemTime> {
        self.last_heartbeat
    }

    #[cfg(test)]
    pub(crate) fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================

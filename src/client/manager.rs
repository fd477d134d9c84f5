//! Connection manager.
//!
//! Owns the link to the gateway and composes the queue, heartbeat and
//! subscription registry around it.
//!
//! # Threading
//!
//! [`ConnectionManager`] is a cheap cloneable handle. Public calls lock the
//! shared state briefly and return; nothing blocks on I/O. Transport events
//! and timer firings are handled by one event-loop task per manager, in
//! arrival order. Device callbacks and event-bus listeners always run after
//! the state lock is released, on a snapshot taken while it was held, so
//! they may call back into the manager.
//!
//! # Connected Sequence
//!
//! When a link opens: reset the attempt counter, send `auth` if the token
//! source yields a token, start the heartbeat, then flush the outbound
//! queue and announce subscriptions in the order set by
//! [`ResubscribePolicy`](crate::config::ResubscribePolicy), and finally
//! emit `ws:connected`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::TokenSource;
use crate::config::{ClientOptions, ReconnectOrder};
use crate::error::{Error, Result};
use crate::events::{EventBus, Handler};
use crate::identifiers::{DeviceId, ListenerId, TransportId};
use crate::protocol::{InboundFrame, OutboundFrame, channel, close_code};
use crate::transport::{Transport, TransportEvent, TransportHandle};

use super::builder::ConnectionManagerBuilder;
use super::event_loop::{self, LoopEvent, TimerKind};
use super::heartbeat::HeartbeatMonitor;
use super::queue::OutboundQueue;
use super::registry::{DeviceHandler, Removal, SubscriptionRegistry};
use super::status::{ClientEvent, ConnectionState, FaultKind, Status};
use super::timer::{Scheduler, TimerSlot, is_armed};

// ============================================================================
// Constants
// ============================================================================

/// Close reason used by `disconnect()`.
const MANUAL_DISCONNECT_REASON: &str = "Manual disconnect";

/// Close reason used when the heartbeat deadline expires.
const HEARTBEAT_TIMEOUT_REASON: &str = "Heartbeat timeout";

/// Close reason used when the manager is dropped.
const DROPPED_REASON: &str = "Client dropped";

// ============================================================================
// Outbox
// ============================================================================

/// Deliveries collected under the state lock, performed after it.
#[derive(Default)]
struct Outbox {
    notices: Vec<Notice>,
}

enum Notice {
    Emit {
        channel: String,
        event: ClientEvent,
    },
    Dispatch {
        device_id: DeviceId,
        handlers: Vec<DeviceHandler>,
        frame: Value,
    },
}

impl Outbox {
    fn emit(&mut self, channel: impl Into<String>, event: ClientEvent) {
        self.notices.push(Notice::Emit {
            channel: channel.into(),
            event,
        });
    }

    fn dispatch(&mut self, device_id: DeviceId, handlers: Vec<DeviceHandler>, frame: Value) {
        self.notices.push(Notice::Dispatch {
            device_id,
            handlers,
            frame,
        });
    }
}

// ============================================================================
// Core
// ============================================================================

/// The live link and the id it was opened with.
struct Link {
    id: TransportId,
    handle: Box<dyn TransportHandle>,
}

/// Mutable manager state, guarded by one lock.
struct Core {
    state: ConnectionState,
    link: Option<Link>,
    last_transport: TransportId,
    scheduler: Scheduler,
    reconnect_attempts: u32,
    reconnect_timer: Option<TimerSlot>,
    heartbeat: HeartbeatMonitor,
    queue: OutboundQueue,
    registry: SubscriptionRegistry,
    resubscribe_timer: Option<TimerSlot>,
    confirm_timers: FxHashMap<DeviceId, TimerSlot>,
    suspended: bool,
    /// Set by a caller `disconnect()`; only a caller `connect()` or
    /// `reconnect()` opens a link again.
    manual_disconnect: bool,
}

impl Core {
    /// Returns `true` if `id` names the live link.
    #[inline]
    fn is_live(&self, id: TransportId) -> bool {
        self.link.as_ref().is_some_and(|link| link.id == id)
    }

    /// Cancels everything tied to the current link.
    fn teardown(&mut self) {
        self.heartbeat.stop();
        self.resubscribe_timer = None;
        self.confirm_timers.clear();
    }
}

// ============================================================================
// Shared
// ============================================================================

/// State shared by every handle and the event loop.
pub(crate) struct Shared {
    client_id: Uuid,
    url: Url,
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    bus: EventBus<ClientEvent>,
    core: Mutex<Core>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(link) = self.core.get_mut().link.take() {
            link.handle.close(close_code::NORMAL_CLOSURE, DROPPED_REASON);
        }
    }
}

impl Shared {
    /// Runs `f` under the state lock, then performs collected deliveries.
    fn with_core<R>(&self, f: impl FnOnce(&Self, &mut Core, &mut Outbox) -> R) -> R {
        let mut out = Outbox::default();
        let result = {
            let mut core = self.core.lock();
            f(self, &mut *core, &mut out)
        };
        self.deliver(out);
        result
    }

    fn deliver(&self, out: Outbox) {
        for notice in out.notices {
            match notice {
                Notice::Emit { channel, event } => {
                    self.bus.emit(&channel, &event);
                }
                Notice::Dispatch {
                    device_id,
                    handlers,
                    frame,
                } => {
                    SubscriptionRegistry::dispatch(&handlers, &device_id, &frame);
                }
            }
        }
    }

    // ========================================================================
    // Event Loop Entry
    // ========================================================================

    pub(crate) fn handle_event(&self, event: LoopEvent) {
        match event {
            LoopEvent::Transport { id, event } => match event {
                TransportEvent::Open => self.on_open(id),
                TransportEvent::Frame(text) => {
                    self.with_core(|s, core, out| s.on_frame(core, out, id, &text));
                }
                TransportEvent::Error(message) => {
                    self.with_core(|s, core, out| s.on_transport_error(core, out, id, message));
                }
                TransportEvent::Close { code, reason } => {
                    self.with_core(|s, core, out| s.on_close(core, out, id, code, reason));
                }
            },
            LoopEvent::Timer { id, kind } => {
                self.with_core(|s, core, out| s.on_timer(core, out, id, kind));
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn connect_locked(&self, core: &mut Core, out: &mut Outbox, by_caller: bool) {
        match core.state {
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Closing => {
                debug!(state = %core.state, "Connect ignored");
                return;
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
        }

        core.reconnect_timer = None;
        if by_caller && core.reconnect_attempts >= self.options.reconnect.max_attempts {
            debug!("Fresh reconnect budget after exhaustion");
            core.reconnect_attempts = 0;
        }

        let id = core.last_transport.next();
        core.last_transport = id;
        core.state = ConnectionState::Connecting;

        debug!(
            transport = %id,
            url = %self.url,
            attempt = core.reconnect_attempts,
            "Connecting"
        );

        match self.transport.open(&self.url, core.scheduler.sink(id)) {
            Ok(handle) => core.link = Some(Link { id, handle }),
            Err(e) => {
                error!(transport = %id, error = %e, "Failed to open transport");
                core.state = ConnectionState::Disconnected;
                out.emit(
                    channel::ERROR,
                    ClientEvent::Error {
                        kind: FaultKind::Connection,
                        message: e.to_string(),
                    },
                );
                out.emit(
                    channel::DISCONNECTED,
                    ClientEvent::Disconnected {
                        code: close_code::ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    },
                );
                self.schedule_reconnect(core, out);
            }
        }
    }

    fn disconnect_locked(&self, core: &mut Core, out: &mut Outbox, reason: &str) {
        core.reconnect_timer = None;
        core.teardown();

        let previous = core.state;
        if let Some(link) = core.link.take() {
            core.state = ConnectionState::Closing;
            link.handle.close(close_code::NORMAL_CLOSURE, reason);
        }
        core.state = ConnectionState::Disconnected;

        if previous.has_link() {
            info!(client = %self.client_id, reason, "Disconnected");
            out.emit(
                channel::DISCONNECTED,
                ClientEvent::Disconnected {
                    code: close_code::NORMAL_CLOSURE,
                    reason: reason.to_string(),
                },
            );
        }
    }

    fn reconnect_locked(&self, core: &mut Core, out: &mut Outbox, reason: &str) {
        self.disconnect_locked(core, out, reason);

        if core.reconnect_attempts >= self.options.reconnect.max_attempts {
            debug!("Fresh reconnect budget after exhaustion");
            core.reconnect_attempts = 0;
        }

        let delay = self.options.manual_reconnect_delay;
        core.state = ConnectionState::Reconnecting;
        core.reconnect_timer = Some(core.scheduler.after(delay, TimerKind::Reconnect));
        debug!(delay_ms = delay.as_millis() as u64, "Reconnect requested");
    }

    /// Enters `Reconnecting`, or gives up if the budget is spent.
    fn schedule_reconnect(&self, core: &mut Core, out: &mut Outbox) {
        let policy = &self.options.reconnect;
        if !policy.enabled {
            return;
        }

        if core.reconnect_attempts >= policy.max_attempts {
            warn!(
                attempts = core.reconnect_attempts,
                "Reconnect attempts exhausted"
            );
            out.emit(
                channel::RECONNECT_FAILED,
                ClientEvent::ReconnectFailed {
                    attempts: core.reconnect_attempts,
                },
            );
            return;
        }

        core.reconnect_attempts += 1;
        let attempt = core.reconnect_attempts;
        let delay = policy.delay_for(attempt);

        core.state = ConnectionState::Reconnecting;
        core.reconnect_timer = Some(core.scheduler.after(delay, TimerKind::Reconnect));

        info!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        out.emit(
            channel::RECONNECTING,
            ClientEvent::Reconnecting { attempt, delay },
        );
    }

    // ========================================================================
    // Transport Events
    // ========================================================================

    fn on_open(&self, id: TransportId) {
        let pending = {
            let core = self.core.lock();
            core.is_live(id) && core.state == ConnectionState::Connecting
        };
        if !pending {
            debug!(transport = %id, "Ignoring open of stale link");
            return;
        }

        // Outside the lock: token sources are user code.
        let token = self.tokens.token();

        self.with_core(|s, core, out| {
            if !(core.is_live(id) && core.state == ConnectionState::Connecting) {
                return;
            }

            core.state = ConnectionState::Connected;
            core.reconnect_attempts = 0;
            core.reconnect_timer = None;
            info!(client = %s.client_id, transport = %id, "Connected");

            if let Some(token) = token {
                s.transmit(core, &OutboundFrame::auth(token));
            }

            if !core.suspended {
                core.heartbeat.start(&core.scheduler);
            }

            if s.options.resubscribe.order == ReconnectOrder::FlushThenResubscribe {
                s.flush(core);
            }

            let grace = s.options.resubscribe.grace;
            if grace.is_zero() {
                s.after_grace(core);
            } else {
                core.resubscribe_timer = Some(core.scheduler.after(grace, TimerKind::Resubscribe));
            }

            out.emit(channel::CONNECTED, ClientEvent::Connected { transport: id });
        });
    }

    fn on_frame(&self, core: &mut Core, out: &mut Outbox, id: TransportId, text: &str) {
        if !core.is_live(id) {
            trace!(transport = %id, "Dropping frame from stale link");
            return;
        }

        let frame = match InboundFrame::from_text(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Failed to parse inbound frame");
                out.emit(
                    channel::ERROR,
                    ClientEvent::Error {
                        kind: FaultKind::Parse,
                        message: e.to_string(),
                    },
                );
                return;
            }
        };

        if frame.is_pong() {
            trace!("Heartbeat reply");
            core.heartbeat.on_pong();
            return;
        }

        if let Some(device_id) = frame.device_id() {
            let handlers = core.registry.snapshot(&device_id);
            if handlers.is_empty() {
                debug!(device_id = %device_id, "No subscription for device frame");
            } else {
                trace!(device_id = %device_id, callbacks = handlers.len(), "Routing device frame");
                out.dispatch(device_id, handlers, frame.value().clone());
            }
        }

        let frame_type = frame.frame_type().map(str::to_string);
        let value = frame.into_value();
        out.emit(channel::MESSAGE, ClientEvent::Message(value.clone()));
        if let Some(frame_type) = frame_type {
            out.emit(
                channel::message_type(&frame_type),
                ClientEvent::Message(value),
            );
        }
    }

    fn on_transport_error(&self, core: &mut Core, out: &mut Outbox, id: TransportId, message: String) {
        if !core.is_live(id) {
            return;
        }
        warn!(transport = %id, %message, "Transport error");
        out.emit(
            channel::ERROR,
            ClientEvent::Error {
                kind: FaultKind::Connection,
                message,
            },
        );
    }

    fn on_close(
        &self,
        core: &mut Core,
        out: &mut Outbox,
        id: TransportId,
        code: u16,
        reason: String,
    ) {
        if !core.is_live(id) {
            debug!(transport = %id, code, "Ignoring close of stale link");
            return;
        }

        core.link = None;
        core.teardown();
        core.state = ConnectionState::Disconnected;

        info!(transport = %id, code, %reason, "Connection closed");
        out.emit(channel::DISCONNECTED, ClientEvent::Disconnected { code, reason });

        if close_code::is_normal(code) {
            return;
        }
        self.schedule_reconnect(core, out);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn on_timer(&self, core: &mut Core, out: &mut Outbox, id: u64, kind: TimerKind) {
        match kind {
            TimerKind::Reconnect => {
                if is_armed(&core.reconnect_timer, id) {
                    core.reconnect_timer = None;
                    if core.state == ConnectionState::Reconnecting {
                        self.connect_locked(core, out, false);
                    }
                }
            }

            TimerKind::HeartbeatTick => {
                if core.state == ConnectionState::Connected
                    && core.heartbeat.on_tick(id, &core.scheduler)
                {
                    self.transmit(core, &OutboundFrame::heartbeat());
                }
            }

            TimerKind::HeartbeatTimeout => {
                if core.heartbeat.on_deadline(id) {
                    warn!(client = %self.client_id, "Heartbeat timeout, reconnecting");
                    self.reconnect_locked(core, out, HEARTBEAT_TIMEOUT_REASON);
                }
            }

            TimerKind::Resubscribe => {
                if is_armed(&core.resubscribe_timer, id) {
                    core.resubscribe_timer = None;
                    if core.state == ConnectionState::Connected {
                        self.after_grace(core);
                    }
                }
            }

            TimerKind::ConfirmSubscribe(device_id) => {
                let armed = core
                    .confirm_timers
                    .get(&device_id)
                    .is_some_and(|slot| slot.id() == id);
                if !armed {
                    return;
                }
                core.confirm_timers.remove(&device_id);

                if core.state == ConnectionState::Connected && core.registry.contains(&device_id) {
                    debug!(device_id = %device_id, "Confirming subscription");
                    self.transmit(core, &OutboundFrame::confirm_subscribe(device_id));
                }
            }
        }
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Writes text on the live link. Returns `false` if not writable.
    fn write_text(core: &Core, text: String) -> bool {
        if core.state != ConnectionState::Connected {
            return false;
        }
        let Some(link) = core.link.as_ref() else {
            return false;
        };
        if !link.handle.is_writable() {
            return false;
        }

        match link.handle.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(transport = %link.id, error = %e, "Write failed");
                false
            }
        }
    }

    /// Writes a message now, or queues it.
    fn send_value(core: &mut Core, value: Value) -> bool {
        if Self::write_text(core, value.to_string()) {
            return true;
        }

        if core.queue.enqueue(value).is_some() {
            debug!(queue_len = core.queue.len(), "Oldest queued message evicted");
        }
        false
    }

    /// Writes a protocol frame now, or queues it.
    fn send_frame(&self, core: &mut Core, frame: &OutboundFrame) -> bool {
        match serde_json::to_value(frame) {
            Ok(value) => Self::send_value(core, value),
            Err(e) => {
                error!(frame_type = frame.frame_type(), error = %e, "Failed to encode frame");
                false
            }
        }
    }

    /// Writes a protocol frame now, dropping it if the link is not writable.
    fn transmit(&self, core: &Core, frame: &OutboundFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => {
                let sent = Self::write_text(core, text);
                if !sent {
                    debug!(frame_type = frame.frame_type(), "Frame not sent, link not writable");
                }
                sent
            }
            Err(e) => {
                error!(frame_type = frame.frame_type(), error = %e, "Failed to encode frame");
                false
            }
        }
    }

    /// One pass over the queue; failures go back in order.
    fn flush(&self, core: &mut Core) {
        if core.queue.is_empty() {
            return;
        }

        let pending = core.queue.drain();
        let total = pending.len();
        let sent = pending
            .into_iter()
            .map(|message| Self::send_value(core, message.payload))
            .filter(|sent| *sent)
            .count();

        debug!(sent, requeued = total - sent, "Flushed outbound queue");
    }

    /// Announces every active device.
    fn resubscribe_all(&self, core: &mut Core) {
        let devices = core.registry.active_devices();
        if devices.is_empty() {
            return;
        }

        info!(devices = devices.len(), "Announcing subscriptions");
        for (device_id, announced) in devices {
            let frame = if announced {
                OutboundFrame::resubscribe(device_id.clone())
            } else {
                OutboundFrame::subscribe(device_id.clone())
            };
            self.send_frame(core, &frame);
            core.registry.mark_announced(&device_id);
        }
    }

    /// Post-grace steps of the connected sequence.
    fn after_grace(&self, core: &mut Core) {
        self.resubscribe_all(core);
        if self.options.resubscribe.order == ReconnectOrder::ResubscribeThenFlush {
            self.flush(core);
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    fn subscribe_locked(
        &self,
        core: &mut Core,
        out: &mut Outbox,
        device_id: DeviceId,
        handler: DeviceHandler,
    ) {
        let added = core.registry.subscribe(device_id.clone(), handler);

        match core.state {
            ConnectionState::Connected if added => {
                self.send_frame(core, &OutboundFrame::subscribe(device_id.clone()));
                core.registry.mark_announced(&device_id);

                if let Some(delay) = self.options.resubscribe.confirm_after {
                    let slot = core
                        .scheduler
                        .after(delay, TimerKind::ConfirmSubscribe(device_id.clone()));
                    core.confirm_timers.insert(device_id, slot);
                }
            }
            ConnectionState::Disconnected if core.manual_disconnect => {
                debug!(device_id = %device_id, "Subscribe after manual disconnect, deferred");
            }
            ConnectionState::Disconnected if self.options.lazy_connect => {
                debug!(device_id = %device_id, "Subscribe while idle, connecting");
                self.connect_locked(core, out, true);
            }
            _ => {
                trace!(device_id = %device_id, state = %core.state, "Subscribe deferred");
            }
        }
    }

    fn unsubscribe_locked(&self, core: &mut Core, device_id: &DeviceId, listener: ListenerId) -> bool {
        match core.registry.unsubscribe(device_id, listener) {
            Removal::NotFound => false,
            Removal::Removed => true,
            Removal::EntryRemoved => {
                core.confirm_timers.remove(device_id);
                if core.state == ConnectionState::Connected {
                    self.transmit(core, &OutboundFrame::unsubscribe(device_id.clone()));
                }
                true
            }
        }
    }

    fn status_locked(&self, core: &Core) -> Status {
        Status {
            client_id: self.client_id,
            state: core.state,
            is_connected: core.state == ConnectionState::Connected,
            is_connecting: core.state == ConnectionState::Connecting,
            reconnect_attempts: core.reconnect_attempts,
            subscriber_count: core.registry.device_count(),
            queue_len: core.queue.len(),
            last_heartbeat: core.heartbeat.last_heartbeat(),
        }
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Handle to one managed gateway connection.
///
/// Cloning yields another handle to the same connection. The connection
/// closes when the last handle is dropped.
///
/// # Example
///
/// ```no_run
/// use telemetry_link::ConnectionManager;
///
/// # async fn example() -> telemetry_link::Result<()> {
/// let manager = ConnectionManager::builder()
///     .url("ws://gateway.local/ws")
///     .build()?;
///
/// let subscription = manager.subscribe("7", |frame| {
///     println!("device 7: {frame}");
/// })?;
///
/// // later
/// subscription.unsubscribe();
/// manager.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.shared.client_id)
            .field("url", &self.shared.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// ConnectionManager - Construction
// ============================================================================

impl ConnectionManager {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new()
    }

    /// Wires the shared state and spawns the event loop.
    pub(crate) fn start(
        url: Url,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenSource>,
        runtime: Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx, runtime.clone());

        let core = Core {
            state: ConnectionState::Disconnected,
            link: None,
            last_transport: TransportId::new(0),
            scheduler,
            reconnect_attempts: 0,
            reconnect_timer: None,
            heartbeat: HeartbeatMonitor::new(options.heartbeat.clone()),
            queue: OutboundQueue::new(options.queue_capacity),
            registry: SubscriptionRegistry::new(),
            resubscribe_timer: None,
            confirm_timers: FxHashMap::default(),
            suspended: false,
            manual_disconnect: false,
        };

        let shared = Arc::new(Shared {
            client_id: Uuid::new_v4(),
            url,
            options,
            transport,
            tokens,
            bus: EventBus::new(),
            core: Mutex::new(core),
        });

        runtime.spawn(event_loop::run(Arc::downgrade(&shared), rx));
        debug!(client = %shared.client_id, url = %shared.url, "Connection manager started");

        let manager = Self { shared };
        if manager.shared.options.auto_connect {
            manager.connect();
        }
        manager
    }
}

// ============================================================================
// ConnectionManager - Lifecycle
// ============================================================================

impl ConnectionManager {
    /// Opens the connection. No-op while connecting or connected.
    ///
    /// While a reconnect is pending, connects now instead. After the
    /// reconnect budget was spent, starts a fresh budget.
    pub fn connect(&self) {
        self.shared.with_core(|s, core, out| {
            core.manual_disconnect = false;
            s.connect_locked(core, out, true);
        });
    }

    /// Closes the connection and cancels every pending timer.
    ///
    /// Subscriptions are kept and re-announced on the next connect. Until
    /// [`connect`](Self::connect) or [`reconnect`](Self::reconnect) is
    /// called, neither `subscribe()` nor `resume()` reopens the link.
    pub fn disconnect(&self) {
        self.shared.with_core(|s, core, out| {
            core.manual_disconnect = true;
            s.disconnect_locked(core, out, MANUAL_DISCONNECT_REASON);
        });
    }

    /// Disconnects, then connects again after the manual reconnect delay.
    ///
    /// After the reconnect budget was spent, starts a fresh budget.
    pub fn reconnect(&self) {
        self.shared.with_core(|s, core, out| {
            core.manual_disconnect = false;
            s.reconnect_locked(core, out, MANUAL_DISCONNECT_REASON);
        });
    }

    /// Pauses heartbeat probing, e.g. while the host is hidden.
    pub fn suspend(&self) {
        self.shared.with_core(|_, core, _| {
            core.suspended = true;
            core.heartbeat.stop();
            debug!("Suspended");
        });
    }

    /// Undoes [`suspend`](Self::suspend): restarts the heartbeat when
    /// connected, connects when idle unless the caller disconnected.
    pub fn resume(&self) {
        self.shared.with_core(|s, core, out| {
            core.suspended = false;
            debug!(state = %core.state, "Resumed");
            match core.state {
                ConnectionState::Connected => {
                    if !core.heartbeat.is_running() {
                        core.heartbeat.start(&core.scheduler);
                    }
                }
                ConnectionState::Disconnected if core.manual_disconnect => {}
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                    s.connect_locked(core, out, true);
                }
                ConnectionState::Connecting | ConnectionState::Closing => {}
            }
        });
    }
}

// ============================================================================
// ConnectionManager - Messaging
// ============================================================================

impl ConnectionManager {
    /// Sends a message, or queues it until the next connect.
    ///
    /// Returns `true` only if it was written right away. A message that
    /// cannot be encoded is dropped and `false` returned.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) -> bool {
        let value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message");
                return false;
            }
        };

        self.shared
            .with_core(|_, core, _| Shared::send_value(core, value))
    }

    /// Subscribes a callback to a device's frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a blank device id.
    pub fn subscribe<F>(&self, device_id: impl Into<DeviceId>, callback: F) -> Result<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_handler(device_id, Handler::new(callback))
    }

    /// Subscribes an existing handler. Subscribing the same handler twice
    /// for one device keeps a single registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a blank device id.
    pub fn subscribe_handler(
        &self,
        device_id: impl Into<DeviceId>,
        handler: DeviceHandler,
    ) -> Result<Subscription> {
        let device_id = device_id.into();
        if device_id.is_blank() {
            return Err(Error::invalid_argument("device id must not be empty"));
        }

        let listener = handler.id();
        self.shared.with_core(|s, core, out| {
            s.subscribe_locked(core, out, device_id.clone(), handler);
        });

        Ok(Subscription {
            shared: Arc::downgrade(&self.shared),
            device_id,
            listener,
        })
    }

    /// Removes one callback from a device.
    ///
    /// Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, device_id: impl Into<DeviceId>, listener: ListenerId) -> bool {
        let device_id = device_id.into();
        self.shared
            .with_core(|s, core, _| s.unsubscribe_locked(core, &device_id, listener))
    }

    /// Drops every subscription. Returns how many devices were subscribed.
    pub fn clear_subscriptions(&self) -> usize {
        self.shared.with_core(|s, core, _| {
            core.confirm_timers.clear();
            let devices = core.registry.clear();
            if core.state == ConnectionState::Connected {
                for device_id in &devices {
                    s.transmit(core, &OutboundFrame::unsubscribe(device_id.clone()));
                }
            }
            info!(devices = devices.len(), "Subscriptions cleared");
            devices.len()
        })
    }

    /// Devices with at least one callback, sorted.
    #[must_use]
    pub fn subscribed_devices(&self) -> Vec<DeviceId> {
        self.shared
            .core
            .lock()
            .registry
            .active_devices()
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }
}

// ============================================================================
// ConnectionManager - Events & Status
// ============================================================================

impl ConnectionManager {
    /// The bus carrying lifecycle and message events.
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus<ClientEvent> {
        &self.shared.bus
    }

    /// Listens on an event channel.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on(event, callback)
    }

    /// Listens for one emission on an event channel.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.bus.once(event, callback)
    }

    /// Stops listening.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.shared.bus.off(event, id)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().state
    }

    /// Snapshot of the manager.
    #[must_use]
    pub fn status(&self) -> Status {
        let core = self.shared.core.lock();
        self.shared.status_locked(&core)
    }

    /// Identity of this manager.
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.shared.client_id
    }

    /// Gateway URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Effective options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Registration of one callback for one device.
///
/// Does not keep the manager alive. Dropping it leaves the callback
/// registered; call [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    shared: Weak<Shared>,
    device_id: DeviceId,
    listener: ListenerId,
}

impl Subscription {
    /// The subscribed device.
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The callback's identity.
    #[inline]
    #[must_use]
    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }

    /// Removes exactly this callback.
    ///
    /// Returns `false` if it was already removed or the manager is gone.
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        shared.with_core(|s, core, _| s.unsubscribe_locked(core, &self.device_id, self.listener))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::sleep;

    use crate::auth::StaticToken;
    use crate::config::{HeartbeatPolicy, ReconnectPolicy, ResubscribePolicy};
    use crate::transport::testing::{FakeLink, FakeTransport};

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn options() -> ClientOptions {
        ClientOptions::new("ws://gateway.test/ws")
            .with_auto_connect(false)
            .with_heartbeat(HeartbeatPolicy::disabled())
            .with_resubscribe(
                ResubscribePolicy::default()
                    .with_grace(Duration::ZERO)
                    .with_confirm_after(None),
            )
    }

    fn build(options: ClientOptions) -> (ConnectionManager, FakeTransport) {
        let transport = FakeTransport::new();
        let manager = ConnectionManager::builder()
            .options(options)
            .transport(transport.clone())
            .build()
            .expect("build manager");
        (manager, transport)
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    async fn connected(options: ClientOptions) -> (ConnectionManager, FakeTransport, FakeLink) {
        let (manager, transport) = build(options);
        manager.connect();
        let link = transport.last_link();
        link.open();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        (manager, transport, link)
    }

    fn record(manager: &ConnectionManager, event: &str) -> Arc<Mutex<Vec<ClientEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.on(event, move |e| sink.lock().push(e.clone()));
        events
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        (count, move |_: &Value| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    // ------------------------------------------------------------------------
    // Connect / subscribe / route
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_while_disconnected_connects_and_routes() {
        let (manager, transport) = build(options());
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);

        manager
            .subscribe("7", move |frame| received_clone.lock().push(frame.clone()))
            .expect("subscribe");
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let link = transport.last_link();
        link.open();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        let subscribes = link.sent_of_type("subscribe");
        assert_eq!(subscribes.len(), 1);
        assert_eq!(subscribes[0]["device_id"], "7");
        assert!(subscribes[0].get("reconnect").is_none());

        let frame = json!({"type": "device_data", "device_id": 7, "points": []});
        link.push(frame.clone());
        settle().await;

        assert_eq!(*received.lock(), vec![frame]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_while_connected_sends_immediately() {
        let (manager, _transport, link) = connected(options()).await;
        let (_, callback) = counter();

        manager.subscribe(12u32, callback).expect("subscribe");

        let subscribes = link.sent_of_type("subscribe");
        assert_eq!(subscribes.len(), 1);
        assert_eq!(subscribes[0]["device_id"], "12");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_connect_disabled_defers() {
        let (manager, transport) = build(options().with_lazy_connect(false));
        let (_, callback) = counter();

        manager.subscribe("1", callback).expect("subscribe");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_callback_twice_invoked_once() {
        let (manager, _transport, link) = connected(options()).await;
        let (count, callback) = counter();
        let handler = Handler::new(callback);

        manager
            .subscribe_handler("3", handler.clone())
            .expect("subscribe");
        manager.subscribe_handler("3", handler).expect("subscribe");

        link.push(json!({"type": "device_data", "device_id": "3"}));
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(link.sent_of_type("subscribe").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_numeric_and_string_id_share_subscription() {
        let (manager, _transport, link) = connected(options()).await;
        let (count, callback) = counter();

        manager.subscribe(5u32, callback).expect("subscribe");
        link.push(json!({"type": "device_data", "device_id": "5"}));
        link.push(json!({"type": "device_data", "device_id": 5.0}));
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(manager.status().subscriber_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_device_id_rejected() {
        let (manager, transport) = build(options());
        let (_, callback) = counter();

        let err = manager.subscribe("  ", callback).expect_err("blank id");
        assert!(err.is_caller_error());
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_last_callback_sends_frame() {
        let (manager, _transport, link) = connected(options()).await;
        let (_, a) = counter();
        let (_, b) = counter();

        let first = manager.subscribe("9", a).expect("subscribe");
        let second = manager.subscribe("9", b).expect("subscribe");
        let listener = second.listener_id();

        assert!(first.unsubscribe());
        assert!(link.sent_of_type("unsubscribe").is_empty());

        assert!(second.unsubscribe());
        let unsubscribes = link.sent_of_type("unsubscribe");
        assert_eq!(unsubscribes.len(), 1);
        assert_eq!(unsubscribes[0]["device_id"], "9");

        assert!(!manager.unsubscribe("9", listener));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_while_disconnected_sends_nothing() {
        let (manager, _transport) = build(options().with_lazy_connect(false));
        let (_, callback) = counter();

        let subscription = manager.subscribe("4", callback).expect("subscribe");
        assert!(subscription.unsubscribe());
        assert_eq!(manager.status().queue_len, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_reenter_manager() {
        let (manager, _transport, link) = connected(options()).await;
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let manager_clone = manager.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let subscription = manager
            .subscribe("8", move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                manager_clone.send(&json!({"type": "ack"}));
                if let Some(subscription) = slot_clone.lock().take() {
                    subscription.unsubscribe();
                }
            })
            .expect("subscribe");
        *slot.lock() = Some(subscription);

        link.push(json!({"type": "device_data", "device_id": 8}));
        link.push(json!({"type": "device_data", "device_id": 8}));
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(link.sent_of_type("ack").len(), 1);
        assert_eq!(manager.status().subscriber_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_does_not_block_others() {
        let (manager, _transport, link) = connected(options()).await;
        let (count, callback) = counter();

        manager
            .subscribe("2", |_| panic!("callback failure"))
            .expect("subscribe");
        manager.subscribe("2", callback).expect("subscribe");

        link.push(json!({"type": "device_data", "device_id": 2}));
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    // ------------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_message_and_typed_channels() {
        let (manager, _transport, link) = connected(options()).await;
        let all = record(&manager, channel::MESSAGE);
        let typed = record(&manager, &channel::message_type("custom"));

        link.push(json!({"type": "custom", "x": 1}));
        link.push(json!({"no_type": true}));
        settle().await;

        assert_eq!(all.lock().len(), 2);
        assert_eq!(
            *typed.lock(),
            vec![ClientEvent::Message(json!({"type": "custom", "x": 1}))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_device_frame_still_broadcast() {
        let (manager, _transport, link) = connected(options()).await;
        let all = record(&manager, channel::MESSAGE);

        link.push(json!({"type": "device_data", "device_id": "nobody"}));
        settle().await;

        assert_eq!(all.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_response_routed_and_broadcast() {
        let (manager, _transport, link) = connected(options()).await;
        let (count, callback) = counter();
        manager.subscribe("6", callback).expect("subscribe");
        let responses = record(&manager, &channel::message_type("subscribe_response"));

        link.push(json!({"type": "subscribe_response", "device_id": 6, "success": true}));
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(responses.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_emits_error_event() {
        let (manager, _transport, link) = connected(options()).await;
        let errors = record(&manager, channel::ERROR);

        link.push_text("{not json");
        settle().await;

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ClientEvent::Error {
                kind: FaultKind::Parse,
                ..
            }
        ));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_not_broadcast() {
        let (manager, _transport, link) = connected(options()).await;
        let all = record(&manager, channel::MESSAGE);

        link.push(json!({"type": "pong", "timestamp": 1}));
        settle().await;

        assert!(all.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_emits_connection_fault() {
        let (manager, _transport, link) = connected(options()).await;
        let errors = record(&manager, channel::ERROR);

        link.fail("reset by peer");
        settle().await;

        assert_eq!(
            *errors.lock(),
            vec![ClientEvent::Error {
                kind: FaultKind::Connection,
                message: "reset by peer".to_string()
            }]
        );
    }

    // ------------------------------------------------------------------------
    // Outbound queue
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_queues_then_flushes_in_order() {
        let (manager, transport) = build(options());

        assert!(!manager.send(&json!({"type": "cmd", "n": 1})));
        assert!(!manager.send(&json!({"type": "cmd", "n": 2})));
        assert_eq!(manager.status().queue_len, 2);

        manager.connect();
        let link = transport.last_link();
        link.open();
        settle().await;

        let sent: Vec<Value> = link.sent_of_type("cmd").into_iter().map(|v| v["n"].clone()).collect();
        assert_eq!(sent, vec![json!(1), json!(2)]);
        assert_eq!(manager.status().queue_len, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_connected_transmits() {
        let (manager, _transport, link) = connected(options()).await;

        assert!(manager.send(&json!({"type": "cmd"})));
        assert_eq!(link.sent_of_type("cmd").len(), 1);
        assert_eq!(manager.status().queue_len, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_overflow_keeps_newest() {
        let (manager, transport) = build(options().with_queue_capacity(2));
        for n in 0..3 {
            manager.send(&json!({"type": "cmd", "n": n}));
        }

        manager.connect();
        let link = transport.last_link();
        link.open();
        settle().await;

        let sent: Vec<Value> = link.sent_of_type("cmd").into_iter().map(|v| v["n"].clone()).collect();
        assert_eq!(sent, vec![json!(1), json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_sent_first() {
        let transport = FakeTransport::new();
        let manager = ConnectionManager::builder()
            .options(options())
            .transport(transport.clone())
            .token_source(StaticToken::new("tok-1"))
            .build()
            .expect("build");
        manager.send(&json!({"type": "cmd"}));

        manager.connect();
        let link = transport.last_link();
        link.open();
        settle().await;

        let sent = link.sent();
        assert_eq!(sent[0]["type"], "auth");
        assert_eq!(sent[0]["token"], "tok-1");
        assert_eq!(sent[1]["type"], "cmd");
    }

    // ------------------------------------------------------------------------
    // Reconnect
    // ------------------------------------------------------------------------

    fn reconnect_options(order: ReconnectOrder) -> ClientOptions {
        options()
            .with_reconnect(ReconnectPolicy::default().with_backoff(
                Duration::from_secs(1),
                2.0,
                Duration::from_secs(10),
            ))
            .with_resubscribe(
                ResubscribePolicy::default()
                    .with_order(order)
                    .with_grace(Duration::ZERO)
                    .with_confirm_after(None),
            )
    }

    /// Drops three links in a row and returns the fourth, still connecting.
    async fn fail_three_times(manager: &ConnectionManager, transport: &FakeTransport) -> FakeLink {
        transport.last_link().drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;

        for _ in 0..2 {
            sleep(Duration::from_secs(10)).await;
            transport.last_link().drop_with(close_code::ABNORMAL_CLOSURE, "gone");
            settle().await;
        }

        sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.status().reconnect_attempts, 3);
        transport.last_link()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_flushes_then_resubscribes() {
        let (manager, transport, _link) =
            connected(reconnect_options(ReconnectOrder::FlushThenResubscribe)).await;
        let (_, a) = counter();
        let (_, b) = counter();
        manager.subscribe("a", a).expect("subscribe");
        manager.subscribe("b", b).expect("subscribe");

        let link = fail_three_times(&manager, &transport).await;
        assert!(!manager.send(&json!({"type": "cmd"})));

        link.open();
        settle().await;
        assert_eq!(manager.status().reconnect_attempts, 0);

        let sent = link.sent();
        let types: Vec<&str> = sent.iter().filter_map(|v| v["type"].as_str()).collect();
        assert_eq!(types, vec!["cmd", "subscribe", "subscribe"]);
        assert_eq!(sent[1]["device_id"], "a");
        assert_eq!(sent[1]["reconnect"], true);
        assert_eq!(sent[2]["device_id"], "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes_then_flushes() {
        let (manager, transport, _link) =
            connected(reconnect_options(ReconnectOrder::ResubscribeThenFlush)).await;
        let (_, a) = counter();
        manager.subscribe("a", a).expect("subscribe");

        let link = fail_three_times(&manager, &transport).await;
        manager.send(&json!({"type": "cmd"}));

        link.open();
        settle().await;

        let types: Vec<String> = link
            .sent()
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["subscribe", "cmd"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_events_and_exhaustion() {
        let policy = ReconnectPolicy::default()
            .with_max_attempts(2)
            .with_backoff(Duration::from_secs(1), 2.0, Duration::from_secs(10));
        let (manager, transport, link) = connected(options().with_reconnect(policy)).await;
        let reconnecting = record(&manager, channel::RECONNECTING);
        let failed = record(&manager, channel::RECONNECT_FAILED);

        link.drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 2);
        transport.last_link().drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;

        sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.open_count(), 3);
        transport.last_link().drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;

        assert_eq!(
            *reconnecting.lock(),
            vec![
                ClientEvent::Reconnecting {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                },
                ClientEvent::Reconnecting {
                    attempt: 2,
                    delay: Duration::from_secs(2)
                },
            ]
        );
        assert_eq!(*failed.lock(), vec![ClientEvent::ReconnectFailed { attempts: 2 }]);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 3);

        // A caller connect starts a fresh budget.
        manager.connect();
        assert_eq!(transport.open_count(), 4);
        assert_eq!(manager.status().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_exhaustion_starts_fresh_budget() {
        let policy = ReconnectPolicy::default()
            .with_max_attempts(1)
            .with_backoff(Duration::from_secs(1), 2.0, Duration::from_secs(10));
        let (manager, transport, link) = connected(options().with_reconnect(policy)).await;
        let failed = record(&manager, channel::RECONNECT_FAILED);

        link.drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;
        sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 2);

        transport.link(1).drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;
        assert_eq!(failed.lock().len(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.reconnect();
        settle().await;
        assert_eq!(transport.open_count(), 3);
        assert_eq!(manager.status().reconnect_attempts, 0);

        transport.link(2).drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;

        assert_eq!(failed.lock().len(), 1);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(manager.status().reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_close_does_not_reconnect() {
        let (manager, transport, link) = connected(options()).await;
        let disconnected = record(&manager, channel::DISCONNECTED);

        link.drop_with(close_code::NORMAL_CLOSURE, "bye");
        settle().await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(
            *disconnected.lock(),
            vec![ClientEvent::Disconnected {
                code: close_code::NORMAL_CLOSURE,
                reason: "bye".to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_disabled_stays_disconnected() {
        let (manager, transport, link) =
            connected(options().with_reconnect(ReconnectPolicy::disabled())).await;

        link.drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_schedules_reconnect() {
        let (manager, transport) = build(options());
        let errors = record(&manager, channel::ERROR);
        transport.set_fail_open(true);

        manager.connect();
        settle().await;

        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(manager.status().reconnect_attempts, 1);
        assert_eq!(errors.lock().len(), 1);

        transport.set_fail_open(false);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_reconnecting_connects_now() {
        let (manager, transport, link) = connected(options()).await;
        link.drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(transport.open_count(), 2);

        // The cancelled timer does not open a third link.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (manager, transport) = build(options());
        manager.connect();
        manager.connect();
        assert_eq!(transport.open_count(), 1);

        transport.last_link().open();
        settle().await;
        manager.connect();
        assert_eq!(transport.open_count(), 1);
    }

    // ------------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_ignores_late_close() {
        let (manager, transport, link) = connected(options()).await;
        let disconnected = record(&manager, channel::DISCONNECTED);

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            link.closed_with(),
            Some((close_code::NORMAL_CLOSURE, MANUAL_DISCONNECT_REASON.to_string()))
        );

        link.drop_with(close_code::ABNORMAL_CLOSURE, "late");
        settle().await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(disconnected.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (manager, transport, link) = connected(options()).await;
        link.drop_with(close_code::ABNORMAL_CLOSURE, "gone");
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        manager.disconnect();
        sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_after_disconnect_stays_disconnected() {
        let (manager, transport, _link) = connected(options()).await;
        let (_, callback) = counter();

        manager.disconnect();
        manager.subscribe("7", callback).expect("subscribe");
        manager.resume();
        settle().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.subscribed_devices(), vec![DeviceId::from("7")]);

        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_heartbeat_deadline() {
        let (manager, transport, link) = connected(heartbeat_options()).await;

        sleep(Duration::from_secs(31)).await;
        assert_eq!(link.sent_of_type("heartbeat").len(), 1);

        manager.disconnect();
        sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(
            link.closed_with(),
            Some((close_code::NORMAL_CLOSURE, MANUAL_DISCONNECT_REASON.to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_keeps_subscriptions() {
        let (manager, transport, _link) = connected(options()).await;
        let (_, callback) = counter();
        manager.subscribe("k", callback).expect("subscribe");

        manager.disconnect();
        assert_eq!(manager.subscribed_devices(), vec![DeviceId::from("k")]);

        manager.connect();
        let link = transport.last_link();
        link.open();
        settle().await;

        let subscribes = link.sent_of_type("subscribe");
        assert_eq!(subscribes.len(), 1);
        assert_eq!(subscribes[0]["reconnect"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_link_frames_ignored() {
        let (manager, transport, old) = connected(options()).await;
        let (count, callback) = counter();
        manager.subscribe("s", callback).expect("subscribe");

        manager.reconnect();
        settle().await;
        let new = transport.last_link();
        new.open();
        settle().await;

        old.push(json!({"type": "device_data", "device_id": "s"}));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        new.push(json!({"type": "device_data", "device_id": "s"}));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_subscriptions() {
        let (manager, _transport, link) = connected(options()).await;
        let (_, a) = counter();
        let (_, b) = counter();
        manager.subscribe("x", a).expect("subscribe");
        manager.subscribe("y", b).expect("subscribe");

        assert_eq!(manager.clear_subscriptions(), 2);
        assert_eq!(manager.status().subscriber_count, 0);
        assert_eq!(link.sent_of_type("unsubscribe").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_handle_closes_link() {
        let (manager, _transport, link) = connected(options()).await;
        drop(manager);
        settle().await;

        assert_eq!(
            link.closed_with().map(|(code, _)| code),
            Some(close_code::NORMAL_CLOSURE)
        );
    }

    // ------------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------------

    fn heartbeat_options() -> ClientOptions {
        options().with_heartbeat(HeartbeatPolicy::new(
            Duration::from_secs(30),
            Duration::from_secs(10),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_triggers_single_reconnect() {
        let (manager, transport, link) = connected(heartbeat_options()).await;

        sleep(Duration::from_secs(31)).await;
        assert_eq!(link.sent_of_type("heartbeat").len(), 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(
            link.closed_with(),
            Some((close_code::NORMAL_CLOSURE, HEARTBEAT_TIMEOUT_REASON.to_string()))
        );
        assert_eq!(transport.open_count(), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_connection() {
        let (manager, transport, link) = connected(heartbeat_options()).await;
        let before = manager.status().last_heartbeat.expect("heartbeat started");

        sleep(Duration::from_secs(31)).await;
        link.push(json!({"type": "pong"}));
        settle().await;

        sleep(Duration::from_secs(15)).await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.status().last_heartbeat.expect("pong time") >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_stops_heartbeat_and_resume_restarts() {
        let (manager, _transport, link) = connected(heartbeat_options()).await;

        manager.suspend();
        sleep(Duration::from_secs(90)).await;
        assert!(link.sent_of_type("heartbeat").is_empty());
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.resume();
        sleep(Duration::from_secs(31)).await;
        assert_eq!(link.sent_of_type("heartbeat").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_connects_when_idle() {
        let (manager, transport) = build(options());
        manager.resume();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(transport.open_count(), 1);
    }

    // ------------------------------------------------------------------------
    // Grace period & confirmation
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_delays_announcement() {
        let options = options().with_resubscribe(
            ResubscribePolicy::default()
                .with_grace(Duration::from_millis(200))
                .with_confirm_after(None),
        );
        let (manager, transport) = build(options);
        let (_, callback) = counter();
        manager.subscribe("g", callback).expect("subscribe");

        let link = transport.last_link();
        link.open();
        settle().await;
        assert!(link.sent_of_type("subscribe").is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(link.sent_of_type("subscribe").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_resend() {
        let options = options().with_resubscribe(
            ResubscribePolicy::default()
                .with_grace(Duration::ZERO)
                .with_confirm_after(Some(Duration::from_secs(3))),
        );
        let (manager, _transport, link) = connected(options).await;
        let (_, callback) = counter();
        manager.subscribe("c", callback).expect("subscribe");

        sleep(Duration::from_secs(4)).await;
        let subscribes = link.sent_of_type("subscribe");
        assert_eq!(subscribes.len(), 2);
        assert_eq!(subscribes[1]["confirm"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_cancelled_by_unsubscribe() {
        let options = options().with_resubscribe(
            ResubscribePolicy::default()
                .with_grace(Duration::ZERO)
                .with_confirm_after(Some(Duration::from_secs(3))),
        );
        let (manager, _transport, link) = connected(options).await;
        let (_, callback) = counter();
        let subscription = manager.subscribe("c", callback).expect("subscribe");
        subscription.unsubscribe();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(link.sent_of_type("subscribe").len(), 1);
    }

    // ------------------------------------------------------------------------
    // Status & events
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot() {
        let (manager, _transport) = build(options().with_lazy_connect(false));
        let (_, callback) = counter();
        manager.subscribe("1", callback).expect("subscribe");
        manager.send(&json!({"type": "cmd"}));

        let status = manager.status();
        assert_eq!(status.client_id, manager.client_id());
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(!status.is_connected);
        assert!(!status.is_connecting);
        assert_eq!(status.subscriber_count, 1);
        assert_eq!(status.queue_len, 1);
        assert_eq!(status.last_heartbeat, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_event_emitted() {
        let (manager, transport) = build(options());
        let connected_events = record(&manager, channel::CONNECTED);

        manager.connect();
        transport.last_link().open();
        settle().await;

        assert_eq!(connected_events.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_connect_on_build() {
        let (manager, transport) = build(options().with_auto_connect(true));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(transport.open_count(), 1);
    }
}

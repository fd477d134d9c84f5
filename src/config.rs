//! Client configuration.
//!
//! [`ClientOptions`] gathers every tunable of the connection manager. It is
//! a plain value with chained `with_*` setters and a [`validate`] step, and
//! can be loaded from the environment with [`ClientOptions::from_env`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use telemetry_link::config::{ClientOptions, HeartbeatPolicy};
//!
//! let options = ClientOptions::new("ws://gateway.local/ws")
//!     .with_queue_capacity(50)
//!     .with_heartbeat(HeartbeatPolicy::new(Duration::from_secs(15), Duration::from_secs(5)));
//!
//! assert!(options.validate().is_ok());
//! ```
//!
//! [`validate`]: ClientOptions::validate

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Gateway URL used when nothing else is configured.
pub const DEFAULT_URL: &str = "ws://127.0.0.1/ws";

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Delay between authenticating and re-announcing subscriptions.
///
/// Gives the gateway time to accept the auth frame before subscribe frames
/// arrive. Tunable through [`ResubscribePolicy::grace`].
pub const DEFAULT_RESUBSCRIBE_GRACE: Duration = Duration::from_millis(200);

/// Delay before a live subscribe is re-sent with `confirm: true`.
pub const DEFAULT_CONFIRM_AFTER: Duration = Duration::from_secs(3);

/// Environment variable holding the gateway URL.
pub const ENV_URL: &str = "TELEMETRY_WS_URL";

/// Environment variable overriding the queue capacity.
pub const ENV_QUEUE_CAPACITY: &str = "TELEMETRY_QUEUE_CAPACITY";

/// Environment variable overriding the reconnect attempt ceiling.
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "TELEMETRY_RECONNECT_MAX_ATTEMPTS";

/// Environment variable overriding the heartbeat interval (milliseconds).
pub const ENV_HEARTBEAT_INTERVAL_MS: &str = "TELEMETRY_HEARTBEAT_INTERVAL_MS";

/// Environment variable overriding the heartbeat timeout (milliseconds).
pub const ENV_HEARTBEAT_TIMEOUT_MS: &str = "TELEMETRY_HEARTBEAT_TIMEOUT_MS";

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Bounded exponential backoff for automatic reconnects.
///
/// The delay before attempt `n` (1-based) is
/// `min(max_interval, base_interval * multiplier^(n-1))`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect automatically after an abnormal close.
    pub enabled: bool,
    /// Attempt ceiling; reaching it ends auto-reconnect for the session.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_interval: Duration,
    /// Upper bound on any delay.
    pub max_interval: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects automatically.
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Sets the attempt ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets base delay, growth factor and cap.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, multiplier: f64, max: Duration) -> Self {
        self.base_interval = base;
        self.multiplier = multiplier;
        self.max_interval = max;
        self
    }

    /// Returns the delay before a given attempt (1-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use telemetry_link::config::ReconnectPolicy;
    ///
    /// let policy = ReconnectPolicy::default()
    ///     .with_backoff(Duration::from_secs(1), 2.0, Duration::from_secs(10));
    /// assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    /// assert_eq!(policy.delay_for(5), Duration::from_secs(10));
    /// ```
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_interval.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }

        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a multiplier below 1 or a cap below
    /// the base delay.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::config(format!(
                "Reconnect multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_interval < self.base_interval {
            return Err(Error::config(
                "Reconnect max_interval must not be smaller than base_interval",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// HeartbeatPolicy
// ============================================================================

/// Liveness probing while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Send probes at all.
    pub enabled: bool,
    /// Time between probes.
    pub interval: Duration,
    /// Time to wait for a `pong` after a probe.
    pub timeout: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatPolicy {
    /// Enabled policy with the given timings.
    #[inline]
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            enabled: true,
            interval,
            timeout,
        }
    }

    /// Policy that never probes.
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero durations on an enabled policy.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && (self.interval.is_zero() || self.timeout.is_zero()) {
            return Err(Error::config(
                "Heartbeat interval and timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ResubscribePolicy
// ============================================================================

/// Order of the post-connect steps that follow authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectOrder {
    /// Flush queued messages at once, re-announce subscriptions after the grace period.
    #[default]
    FlushThenResubscribe,
    /// After the grace period, re-announce subscriptions, then flush queued messages.
    ResubscribeThenFlush,
}

/// How subscriptions are announced to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResubscribePolicy {
    /// Relative order of queue flush and re-announcement.
    pub order: ReconnectOrder,
    /// Delay after authentication before re-announcing.
    pub grace: Duration,
    /// Re-send a live subscribe with `confirm: true` after this delay.
    pub confirm_after: Option<Duration>,
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self {
            order: ReconnectOrder::default(),
            grace: DEFAULT_RESUBSCRIBE_GRACE,
            confirm_after: Some(DEFAULT_CONFIRM_AFTER),
        }
    }
}

impl ResubscribePolicy {
    /// Sets the step order.
    #[inline]
    #[must_use]
    pub fn with_order(mut self, order: ReconnectOrder) -> Self {
        self.order = order;
        self
    }

    /// Sets the grace period.
    #[inline]
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Sets or disables the confirmation re-send.
    #[inline]
    #[must_use]
    pub fn with_confirm_after(mut self, confirm_after: Option<Duration>) -> Self {
        self.confirm_after = confirm_after;
        self
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Gateway URL (`ws://` or `wss://`).
    pub url: String,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Connect as soon as the manager is built.
    pub auto_connect: bool,
    /// Connect when a subscription is added while idle.
    pub lazy_connect: bool,
    /// Delay between `reconnect()`'s disconnect and its connect attempt.
    pub manual_reconnect_delay: Duration,
    /// Automatic reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Liveness probing.
    pub heartbeat: HeartbeatPolicy,
    /// Subscription announcement.
    pub resubscribe: ResubscribePolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings for a gateway URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auto_connect: true,
            lazy_connect: true,
            manual_reconnect_delay: Duration::ZERO,
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
            resubscribe: ResubscribePolicy::default(),
        }
    }

    /// Loads options from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads options through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a numeric variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_URL)
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        let mut options = Self::new(url);

        if let Some(capacity) = parse_var::<usize>(&lookup, ENV_QUEUE_CAPACITY)? {
            options.queue_capacity = capacity;
        }
        if let Some(max_attempts) = parse_var::<u32>(&lookup, ENV_RECONNECT_MAX_ATTEMPTS)? {
            options.reconnect.max_attempts = max_attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_HEARTBEAT_INTERVAL_MS)? {
            options.heartbeat.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_HEARTBEAT_TIMEOUT_MS)? {
            options.heartbeat.timeout = Duration::from_millis(ms);
        }

        Ok(options)
    }
}

/// Parses an optional numeric variable.
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("{key}={raw:?}: {e}"))),
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the gateway URL.
    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the outbound queue capacity.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enables or disables connecting at build time.
    #[inline]
    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Enables or disables connecting on subscribe while idle.
    #[inline]
    #[must_use]
    pub fn with_lazy_connect(mut self, lazy_connect: bool) -> Self {
        self.lazy_connect = lazy_connect;
        self
    }

    /// Sets the delay used by `reconnect()`.
    #[inline]
    #[must_use]
    pub fn with_manual_reconnect_delay(mut self, delay: Duration) -> Self {
        self.manual_reconnect_delay = delay;
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the heartbeat policy.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, policy: HeartbeatPolicy) -> Self {
        self.heartbeat = policy;
        self
    }

    /// Sets the resubscribe policy.
    #[inline]
    #[must_use]
    pub fn with_resubscribe(mut self, policy: ResubscribePolicy) -> Self {
        self.resubscribe = policy;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientOptions {
    /// Validates the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::config("Gateway URL must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("Queue capacity must be greater than zero"));
        }
        self.reconnect.validate()?;
        self.heartbeat.validate()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Latest-value view of one device.
//!
//! [`DeviceMonitor`] subscribes to a device and keeps the most recent
//! `device_data` frame in typed form, for callers that poll rather than
//! react.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifiers::DeviceId;
use crate::protocol::frame_type;
use crate::protocol::{DataPoint, DeviceData};

use super::manager::{ConnectionManager, Subscription};

// ============================================================================
// MonitorState
// ============================================================================

#[derive(Debug, Default)]
struct MonitorState {
    latest: Option<DeviceData>,
    updated_at: Option<SystemTime>,
    updates: u64,
}

// ============================================================================
// DeviceMonitor
// ============================================================================

/// Keeps the latest telemetry of one device.
///
/// Unsubscribes when closed or dropped.
///
/// # Example
///
/// ```no_run
/// use telemetry_link::{ConnectionManager, DeviceMonitor};
///
/// # async fn example(manager: &ConnectionManager) -> telemetry_link::Result<()> {
/// let monitor = DeviceMonitor::new(manager, 7)?;
/// if let Some(temp) = monitor.point_value("temp") {
///     println!("temperature: {temp}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceMonitor {
    device_id: DeviceId,
    state: Arc<Mutex<MonitorState>>,
    subscription: Option<Subscription>,
}

impl DeviceMonitor {
    /// Subscribes to `device_id` on `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument)
    /// for a blank device id.
    pub fn new(manager: &ConnectionManager, device_id: impl Into<DeviceId>) -> Result<Self> {
        let device_id = device_id.into();
        let state = Arc::new(Mutex::new(MonitorState::default()));

        let sink = Arc::clone(&state);
        let subscription = manager.subscribe(device_id.clone(), move |frame| {
            Self::record(&sink, frame);
        })?;

        debug!(device_id = %device_id, "Device monitor started");

        Ok(Self {
            device_id,
            state,
            subscription: Some(subscription),
        })
    }

    /// Stores a frame if it is device telemetry.
    fn record(state: &Mutex<MonitorState>, frame: &Value) {
        let kind = frame.get("type").and_then(Value::as_str);
        if kind.is_some_and(|t| t != frame_type::DEVICE_DATA) {
            return;
        }

        match serde_json::from_value::<DeviceData>(frame.clone()) {
            Ok(data) => {
                let mut state = state.lock();
                state.latest = Some(data);
                state.updated_at = Some(SystemTime::now());
                state.updates += 1;
            }
            Err(e) => {
                warn!(error = %e, "Malformed device data frame");
            }
        }
    }

    /// The monitored device.
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The most recent telemetry, if any arrived.
    #[must_use]
    pub fn latest(&self) -> Option<DeviceData> {
        self.state.lock().latest.clone()
    }

    /// When the most recent telemetry arrived.
    #[must_use]
    pub fn updated_at(&self) -> Option<SystemTime> {
        self.state.lock().updated_at
    }

    /// Number of telemetry frames received.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.state.lock().updates
    }

    /// Points of the most recent telemetry.
    #[must_use]
    pub fn points(&self) -> Vec<DataPoint> {
        self.state
            .lock()
            .latest
            .as_ref()
            .map(|d| d.points.clone())
            .unwrap_or_default()
    }

    /// A point of the most recent telemetry.
    #[must_use]
    pub fn point(&self, point_code: &str) -> Option<DataPoint> {
        self.state
            .lock()
            .latest
            .as_ref()
            .and_then(|d| d.point(point_code).cloned())
    }

    /// A point's engineering value.
    #[must_use]
    pub fn point_value(&self, point_code: &str) -> Option<Value> {
        self.point(point_code).map(|p| p.value)
    }

    /// A point's raw value.
    #[must_use]
    pub fn point_raw_value(&self, point_code: &str) -> Option<Value> {
        self.point(point_code).map(|p| p.raw_value)
    }

    /// Returns `true` until closed.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Unsubscribes. Data received so far stays readable.
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!(device_id = %self.device_id, "Device monitor closed");
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Typed device telemetry.
//!
//! A `device_data` frame carries a list of data points:
//!
//! ```json
//! {
//!   "type": "device_data",
//!   "device_id": 7,
//!   "timestamp": 1700000000000,
//!   "points": [
//!     { "point_code": "temp", "value": 21.5, "raw_value": 215,
//!       "point_type": "int16", "quality": "good" }
//!   ]
//! }
//! ```
//!
//! Fields this crate does not model are kept in `extra` maps.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identifiers::DeviceId;

// ============================================================================
// PointType
// ============================================================================

/// Register/value type of a data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
    Bit,
    String,
    Bool,
}

// ============================================================================
// DataQuality
// ============================================================================

/// Quality flag reported with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    Good,
    Bad,
    Uncertain,
    #[default]
    Unknown,
}

// ============================================================================
// DataPoint
// ============================================================================

/// One measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Point code, unique within the device.
    pub point_code: String,

    /// Engineering value.
    #[serde(default)]
    pub value: Value,

    /// Raw register value before scaling.
    #[serde(default)]
    pub raw_value: Value,

    /// Value type, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_type: Option<PointType>,

    /// Quality flag.
    #[serde(default)]
    pub quality: DataQuality,

    /// Unmodelled fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// DeviceData
// ============================================================================

/// Payload of a `device_data` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    /// Canonical device id.
    pub device_id: DeviceId,

    /// Gateway timestamp in epoch milliseconds, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    /// Reported points.
    #[serde(default)]
    pub points: Vec<DataPoint>,

    /// Unmodelled fields (including `type`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceData {
    /// Finds a point by code.
    #[must_use]
    pub fn point(&self, point_code: &str) -> Option<&DataPoint> {
        self.points.iter().find(|p| p.point_code == point_code)
    }

    /// Returns a point's engineering value.
    #[must_use]
    pub fn point_value(&self, point_code: &str) -> Option<&Value> {
        self.point(point_code).map(|p| &p.value)
    }

    /// Returns a point's raw value.
    #[must_use]
    pub fn point_raw_value(&self, point_code: &str) -> Option<&Value> {
        self.point(point_code).map(|p| &p.raw_value)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Sensor descriptors and captured events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of sensor producing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Accelerometer,
    MagneticField,
    Orientation,
    Gyroscope,
    Light,
    Pressure,
    Proximity,
    Gravity,
    LinearAcceleration,
    RotationVector,
    MagneticFieldUncalibrated,
    GameRotationVector,
    GyroscopeUncalibrated,
    GeomagneticRotationVector,
    /// Vendor or otherwise unlisted sensor type.
    Other(u32),
}

impl SensorType {
    /// Stable display name.
    pub fn name(&self) -> String {
        match self {
            SensorType::Accelerometer => "accelerometer".to_string(),
            SensorType::MagneticField => "magnetic_field".to_string(),
            SensorType::Orientation => "orientation".to_string(),
            SensorType::Gyroscope => "gyroscope".to_string(),
            SensorType::Light => "light".to_string(),
            SensorType::Pressure => "pressure".to_string(),
            SensorType::Proximity => "proximity".to_string(),
            SensorType::Gravity => "gravity".to_string(),
            SensorType::LinearAcceleration => "linear_acceleration".to_string(),
            SensorType::RotationVector => "rotation_vector".to_string(),
            SensorType::MagneticFieldUncalibrated => "magnetic_field_uncalibrated".to_string(),
            SensorType::GameRotationVector => "game_rotation_vector".to_string(),
            SensorType::GyroscopeUncalibrated => "gyroscope_uncalibrated".to_string(),
            SensorType::GeomagneticRotationVector => "geomagnetic_rotation_vector".to_string(),
            SensorType::Other(id) => format!("other_{id}"),
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// How a sensor reports its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportingMode {
    /// Events at a constant rate set by the sampling period.
    #[default]
    Continuous,
    /// Events only when the measured value changes.
    OnChange,
    /// A single event, then the sensor deactivates.
    OneShot,
    /// Sensor-specific trigger semantics.
    SpecialTrigger,
}

/// Static description of an event source channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub sensor_type: SensorType,

    /// Human-readable name reported by the source.
    pub name: String,

    /// Source-assigned handle.
    #[serde(default)]
    pub handle: i32,

    /// Fastest supported sampling period in microseconds.
    pub min_delay_us: u32,

    /// Slowest supported sampling period in microseconds (0 = unbounded).
    #[serde(default)]
    pub max_delay_us: u32,

    #[serde(default)]
    pub reporting_mode: ReportingMode,
}

impl SensorDescriptor {
    /// Create a continuous sensor descriptor.
    pub fn new(sensor_type: SensorType, name: impl Into<String>, min_delay_us: u32) -> Self {
        Self {
            sensor_type,
            name: name.into(),
            handle: 0,
            min_delay_us,
            max_delay_us: 0,
            reporting_mode: ReportingMode::Continuous,
        }
    }

    pub fn with_handle(mut self, handle: i32) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_max_delay_us(mut self, max_delay_us: u32) -> Self {
        self.max_delay_us = max_delay_us;
        self
    }

    pub fn with_reporting_mode(mut self, mode: ReportingMode) -> Self {
        self.reporting_mode = mode;
        self
    }
}

/// A sample as delivered by a source, before the listener stamps receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSensorEvent {
    /// Source-reported timestamp in nanoseconds.
    pub timestamp_ns: i64,
    pub accuracy: i32,
    pub values: Vec<f32>,
}

impl RawSensorEvent {
    pub fn new(timestamp_ns: i64, values: Vec<f32>) -> Self {
        Self {
            timestamp_ns,
            accuracy: 3,
            values,
        }
    }
}

/// One captured, immutable sensor sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub sensor: Arc<SensorDescriptor>,
    /// Source-reported timestamp in nanoseconds.
    pub timestamp_ns: i64,
    /// Locally observed receipt timestamp in nanoseconds.
    pub received_timestamp_ns: i64,
    pub accuracy: i32,
    pub values: Vec<f32>,
}

impl SensorEvent {
    pub fn from_raw(sensor: Arc<SensorDescriptor>, raw: RawSensorEvent, received_timestamp_ns: i64) -> Self {
        Self {
            sensor,
            timestamp_ns: raw.timestamp_ns,
            received_timestamp_ns,
            accuracy: raw.accuracy,
            values: raw.values,
        }
    }
}

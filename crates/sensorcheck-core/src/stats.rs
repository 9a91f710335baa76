//! Hierarchical statistics collected by sensor operations.
//!
//! A [`SensorStats`] record maps string keys to either a scalar/array
//! [`StatValue`] or a nested record. Keys are unique within a record and a
//! later write to the same key wins. Parallel and repeated child operations
//! are merged under zero-padded indexed keys (`parallel_000`, ...).
//!
//! Records are not synchronised: the owning operation is the only writer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Delimiter used by [`SensorStats::flatten`] to join nested keys.
pub const DELIMITER: &str = "__";

pub const ERROR: &str = "error";
pub const SENSOR_NAME_KEY: &str = "sensor_name";
pub const SENSOR_HANDLE_KEY: &str = "sensor_handle";
pub const EVENT_COUNT_KEY: &str = "event_count";
pub const FREQUENCY_KEY: &str = "frequency";
pub const JITTER_95_PERCENTILE_KEY: &str = "jitter_95_percentile";
pub const MEAN_KEY: &str = "mean";
pub const MAGNITUDE_KEY: &str = "magnitude";
pub const STANDARD_DEVIATION_KEY: &str = "standard_deviation";
pub const EVENT_OUT_OF_ORDER_COUNT_KEY: &str = "event_out_of_order_count";
pub const EVENT_OUT_OF_ORDER_POSITIONS_KEY: &str = "event_out_of_order_positions";
pub const EVENT_GAP_COUNT_KEY: &str = "event_gap_count";
pub const EVENT_GAP_POSITIONS_KEY: &str = "event_gap_positions";
pub const EVENT_TIME_SYNCHRONIZATION_COUNT_KEY: &str = "timestamp_synchronization_count";
pub const EVENT_TIME_SYNCHRONIZATION_POSITIONS_KEY: &str = "timestamp_synchronization_positions";

/// A single recorded metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
}

impl StatValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StatValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StatValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Float(f) => Some(*f),
            StatValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StatValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            StatValue::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float_array(&self) -> Option<&[f64]> {
        match self {
            StatValue::FloatArray(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatValue::Bool(b) => write!(f, "{b}"),
            StatValue::Int(i) => write!(f, "{i}"),
            StatValue::Float(v) => write!(f, "{v:.4}"),
            StatValue::Text(s) => write!(f, "{s}"),
            StatValue::IntArray(v) => write!(f, "{v:?}"),
            StatValue::FloatArray(v) => {
                let parts: Vec<String> = v.iter().map(|x| format!("{x:.4}")).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<bool> for StatValue {
    fn from(v: bool) -> Self {
        StatValue::Bool(v)
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Int(v)
    }
}

impl From<i32> for StatValue {
    fn from(v: i32) -> Self {
        StatValue::Int(i64::from(v))
    }
}

impl From<u32> for StatValue {
    fn from(v: u32) -> Self {
        StatValue::Int(i64::from(v))
    }
}

impl From<usize> for StatValue {
    fn from(v: usize) -> Self {
        StatValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<f32> for StatValue {
    fn from(v: f32) -> Self {
        StatValue::Float(f64::from(v))
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

impl From<String> for StatValue {
    fn from(v: String) -> Self {
        StatValue::Text(v)
    }
}

impl From<Vec<i64>> for StatValue {
    fn from(v: Vec<i64>) -> Self {
        StatValue::IntArray(v)
    }
}

impl From<Vec<usize>> for StatValue {
    fn from(v: Vec<usize>) -> Self {
        StatValue::IntArray(
            v.into_iter()
                .map(|i| i64::try_from(i).unwrap_or(i64::MAX))
                .collect(),
        )
    }
}

impl From<Vec<f64>> for StatValue {
    fn from(v: Vec<f64>) -> Self {
        StatValue::FloatArray(v)
    }
}

/// One entry of a statistics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatEntry {
    Value(StatValue),
    Nested(SensorStats),
}

/// Hierarchical key/value statistics record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorStats {
    entries: BTreeMap<String, StatEntry>,
}

impl SensorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, replacing whatever was there.
    pub fn add_value(&mut self, key: impl Into<String>, value: impl Into<StatValue>) {
        self.entries
            .insert(key.into(), StatEntry::Value(value.into()));
    }

    /// Store a nested record under `key`, replacing whatever was there.
    pub fn add_sensor_stats(&mut self, key: impl Into<String>, stats: SensorStats) {
        self.entries.insert(key.into(), StatEntry::Nested(stats));
    }

    /// Store a nested record under `{key}_{index:03}`.
    pub fn add_indexed_sensor_stats(&mut self, key: &str, index: usize, stats: SensorStats) {
        self.add_sensor_stats(indexed_key(key, index), stats);
    }

    /// Scalar or array value stored under `key`.
    pub fn value(&self, key: &str) -> Option<&StatValue> {
        match self.entries.get(key) {
            Some(StatEntry::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Nested record stored under `key`.
    pub fn sensor_stats(&self, key: &str) -> Option<&SensorStats> {
        match self.entries.get(key) {
            Some(StatEntry::Nested(s)) => Some(s),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Top-level keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The aggregated failure message recorded by the owning operation, if any.
    pub fn error(&self) -> Option<&str> {
        self.value(ERROR).and_then(StatValue::as_str)
    }

    /// Flatten this record and every nested record into a single map.
    ///
    /// Nested keys are joined with [`DELIMITER`]: a nested record stored under
    /// `key1` holding `("key2", v)` yields `("key1__key2", v)`.
    pub fn flatten(&self) -> BTreeMap<String, StatValue> {
        let mut flat = BTreeMap::new();
        self.flatten_into("", &mut flat);
        flat
    }

    fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, StatValue>) {
        for (key, entry) in &self.entries {
            let full = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}{DELIMITER}{key}")
            };
            match entry {
                StatEntry::Value(v) => {
                    out.insert(full, v.clone());
                }
                StatEntry::Nested(s) => s.flatten_into(&full, out),
            }
        }
    }

    /// Emit every flattened metric at `debug` level, sorted by key.
    pub fn log_stats(&self, label: &str) {
        for (key, value) in self.flatten() {
            tracing::debug!(operation = %label, "{key}: {value}");
        }
    }
}

/// Format the canonical indexed key: `{key}_{index:03}`.
pub fn indexed_key(key: &str, index: usize) -> String {
    format!("{key}_{index:03}")
}

//! Default-verification lookup table.
//!
//! The engine does not hard-code which checks apply to which sensor. Callers
//! supply a [`VerificationDefaults`] table (usually loaded from JSON) and
//! [`VerificationDefaults::build`] turns the entry for the environment's
//! sensor into concrete units. [`VerificationDefaults::cts`] reproduces the
//! classic table for a device at rest.

use serde::{Deserialize, Serialize};

use crate::environment::{frequency_hz_from_period_us, TestSensorEnvironment};
use crate::error::ConfigError;
use crate::event::SensorType;

use super::frequency::{DEFAULT_LOWER_THRESHOLD_PCT, DEFAULT_UPPER_THRESHOLD_PCT};
use super::{
    EventGapVerification, EventOrderingVerification, FrequencyVerification, JitterVerification,
    MagnitudeVerification, MeanVerification, SensorVerification, StandardDeviationVerification,
    TimestampSynchronizationVerification,
};

/// Standard gravity in m/s^2.
pub const STANDARD_GRAVITY: f32 = 9.80665;
/// Standard atmosphere in hPa.
pub const PRESSURE_STANDARD_ATMOSPHERE: f32 = 1013.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeDefault {
    pub expected: f32,
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanDefault {
    pub expected: Vec<f32>,
    pub threshold: Vec<f32>,
}

/// Default checks for one sensor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDefaults {
    pub sensor_type: SensorType,
    #[serde(default)]
    pub event_ordering: bool,
    #[serde(default)]
    pub frequency: bool,
    /// Jitter threshold as a percentage of the expected period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_threshold_pct: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<MagnitudeDefault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<MeanDefault>,
    /// Per-channel standard deviation thresholds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_deviation: Option<Vec<f32>>,
    #[serde(default)]
    pub event_gap: bool,
    #[serde(default)]
    pub timestamp_synchronization: bool,
}

impl SensorDefaults {
    pub fn new(sensor_type: SensorType) -> Self {
        Self {
            sensor_type,
            event_ordering: false,
            frequency: false,
            jitter_threshold_pct: None,
            magnitude: None,
            mean: None,
            standard_deviation: None,
            event_gap: false,
            timestamp_synchronization: false,
        }
    }
}

fn default_lower_pct() -> f64 {
    DEFAULT_LOWER_THRESHOLD_PCT
}

fn default_upper_pct() -> f64 {
    DEFAULT_UPPER_THRESHOLD_PCT
}

/// Caller-supplied table of default verifications keyed by sensor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDefaults {
    #[serde(default = "default_lower_pct")]
    pub frequency_lower_pct: f64,
    #[serde(default = "default_upper_pct")]
    pub frequency_upper_pct: f64,
    #[serde(default)]
    pub sensors: Vec<SensorDefaults>,
}

impl Default for VerificationDefaults {
    fn default() -> Self {
        Self {
            frequency_lower_pct: DEFAULT_LOWER_THRESHOLD_PCT,
            frequency_upper_pct: DEFAULT_UPPER_THRESHOLD_PCT,
            sensors: Vec::new(),
        }
    }
}

impl VerificationDefaults {
    /// The classic compatibility-suite table for a device at rest.
    ///
    /// Thresholds of `f32::MAX` / `u32::MAX` record values without failing.
    pub fn cts() -> Self {
        const MOTION: [SensorType; 12] = [
            SensorType::Accelerometer,
            SensorType::MagneticField,
            SensorType::Orientation,
            SensorType::Gyroscope,
            SensorType::Pressure,
            SensorType::Gravity,
            SensorType::LinearAcceleration,
            SensorType::RotationVector,
            SensorType::MagneticFieldUncalibrated,
            SensorType::GameRotationVector,
            SensorType::GyroscopeUncalibrated,
            SensorType::GeomagneticRotationVector,
        ];
        let max = f32::MAX;

        let sensors = MOTION
            .iter()
            .map(|&sensor_type| {
                let mut d = SensorDefaults::new(sensor_type);
                d.event_ordering = true;
                d.frequency = true;
                d.jitter_threshold_pct = Some(u32::MAX);
                d.standard_deviation = Some(match sensor_type {
                    SensorType::Accelerometer => vec![1.0; 3],
                    SensorType::Gyroscope => vec![0.5; 3],
                    SensorType::RotationVector
                    | SensorType::GameRotationVector
                    | SensorType::GeomagneticRotationVector => vec![max; 5],
                    SensorType::MagneticFieldUncalibrated | SensorType::GyroscopeUncalibrated => {
                        vec![max; 6]
                    }
                    _ => vec![max; 3],
                });
                d.magnitude = match sensor_type {
                    SensorType::Accelerometer => Some(MagnitudeDefault {
                        expected: STANDARD_GRAVITY,
                        threshold: 1.5,
                    }),
                    SensorType::Gyroscope => Some(MagnitudeDefault {
                        expected: 0.0,
                        threshold: 1.5,
                    }),
                    SensorType::Gravity => Some(MagnitudeDefault {
                        expected: STANDARD_GRAVITY,
                        threshold: max,
                    }),
                    _ => None,
                };
                d.mean = match sensor_type {
                    SensorType::Gyroscope | SensorType::LinearAcceleration => Some(MeanDefault {
                        expected: vec![0.0; 3],
                        threshold: vec![max; 3],
                    }),
                    SensorType::Pressure => Some(MeanDefault {
                        expected: vec![PRESSURE_STANDARD_ATMOSPHERE, 0.0, 0.0],
                        threshold: vec![max; 3],
                    }),
                    SensorType::GameRotationVector => Some(MeanDefault {
                        expected: vec![0.0, 0.0, 0.0, 1.0, 0.0],
                        threshold: vec![max; 5],
                    }),
                    SensorType::GyroscopeUncalibrated => Some(MeanDefault {
                        expected: vec![0.0; 6],
                        threshold: vec![max; 6],
                    }),
                    _ => None,
                };
                d
            })
            .collect();

        Self {
            sensors,
            ..Self::default()
        }
    }

    pub fn for_sensor(&self, sensor_type: SensorType) -> Option<&SensorDefaults> {
        self.sensors.iter().find(|d| d.sensor_type == sensor_type)
    }

    /// Concrete units for the environment's sensor.
    ///
    /// Rate-dependent checks (frequency, jitter, gaps, timestamp
    /// synchronization) are only built for testable sampling rates, and
    /// frequency is also skipped when other listeners may drive the sensor.
    pub fn build(&self, env: &TestSensorEnvironment) -> Result<Vec<Box<dyn SensorVerification>>, ConfigError> {
        let sensor = env.sensor();
        let Some(defaults) = self.for_sensor(sensor.sensor_type) else {
            tracing::debug!(sensor = %sensor.name, "no default verifications for sensor type");
            return Ok(Vec::new());
        };

        let mut units: Vec<Box<dyn SensorVerification>> = Vec::new();
        if defaults.event_ordering {
            units.push(Box::new(EventOrderingVerification::new()));
        }

        match env.expected_sampling_period_us() {
            Ok(period_us) => {
                let period_ns = i64::from(period_us) * 1_000;
                if defaults.frequency && env.is_continuous() && !env.is_sampling_rate_overloaded() {
                    units.push(Box::new(FrequencyVerification::with_percent_thresholds(
                        frequency_hz_from_period_us(f64::from(period_us)),
                        self.frequency_lower_pct,
                        self.frequency_upper_pct,
                    )));
                }
                if let Some(pct) = defaults.jitter_threshold_pct {
                    units.push(Box::new(JitterVerification::new(period_ns, pct)));
                }
                if defaults.event_gap && env.is_continuous() {
                    units.push(Box::new(EventGapVerification::new(period_ns)));
                }
                if defaults.timestamp_synchronization && env.is_continuous() {
                    units.push(Box::new(TimestampSynchronizationVerification::new(
                        period_ns,
                        i64::from(env.max_report_latency_us()) * 1_000,
                    )));
                }
            }
            Err(err) => {
                tracing::debug!(sensor = %sensor.name, %err, "skipping rate-dependent verifications");
            }
        }

        if let Some(m) = &defaults.mean {
            units.push(Box::new(MeanVerification::new(m.expected.clone(), m.threshold.clone())?));
        }
        if let Some(m) = &defaults.magnitude {
            units.push(Box::new(MagnitudeVerification::new(m.expected, m.threshold)));
        }
        if let Some(threshold) = &defaults.standard_deviation {
            units.push(Box::new(StandardDeviationVerification::new(threshold.clone())));
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SamplingRate;
    use crate::event::{ReportingMode, SensorDescriptor};
    use crate::fakes::ScriptedSource;
    use crate::stats::SensorStats;
    use crate::verification::test_support::at_timestamps;
    use std::sync::Arc;

    fn env(sensor_type: SensorType, rate: SamplingRate) -> TestSensorEnvironment {
        let sensor = SensorDescriptor::new(sensor_type, sensor_type.name(), 5_000);
        TestSensorEnvironment::new(Arc::new(ScriptedSource::new(Vec::new())), sensor, rate)
    }

    fn names(units: &[Box<dyn SensorVerification>]) -> Vec<&'static str> {
        units.iter().map(|u| u.name()).collect()
    }

    #[test]
    fn test_cts_accelerometer_defaults() {
        let units = VerificationDefaults::cts()
            .build(&env(SensorType::Accelerometer, SamplingRate::Fastest))
            .expect("build");
        assert_eq!(
            names(&units),
            vec!["event_order", "frequency", "jitter", "magnitude", "standard_deviation"]
        );
    }

    #[test]
    fn test_rate_checks_use_clamped_period() {
        // 1000us requested from a sensor limited to 5000us: events arrive every 5ms
        let env = env(SensorType::Accelerometer, SamplingRate::PeriodUs(1_000));
        let units = VerificationDefaults::cts().build(&env).expect("build");
        let timestamps: Vec<i64> = (0..20).map(|i| i * 5_000_000).collect();
        let events = at_timestamps(&timestamps);

        for name in ["frequency", "jitter"] {
            let unit = units.iter().find(|u| u.name() == name).expect("unit built");
            let mut stats = SensorStats::new();
            let result = unit.verify(&env, &events, &mut stats);
            assert!(result.is_ok(), "{name}: {result:?}");
        }
    }

    #[test]
    fn test_symbolic_rate_skips_rate_checks() {
        let units = VerificationDefaults::cts()
            .build(&env(SensorType::Gyroscope, SamplingRate::Game))
            .expect("build");
        assert_eq!(
            names(&units),
            vec!["event_order", "mean", "magnitude", "standard_deviation"]
        );
    }

    #[test]
    fn test_unlisted_sensor_has_no_defaults() {
        let units = VerificationDefaults::cts()
            .build(&env(SensorType::Light, SamplingRate::Fastest))
            .expect("build");
        assert!(units.is_empty());
    }

    #[test]
    fn test_frequency_skipped_for_on_change_sensor() {
        let mut table = VerificationDefaults::default();
        let mut entry = SensorDefaults::new(SensorType::Proximity);
        entry.frequency = true;
        entry.event_gap = true;
        table.sensors.push(entry);

        let sensor = SensorDescriptor::new(SensorType::Proximity, "prox", 5_000)
            .with_reporting_mode(ReportingMode::OnChange);
        let env = TestSensorEnvironment::new(
            Arc::new(ScriptedSource::new(Vec::new())),
            sensor,
            SamplingRate::Fastest,
        );
        assert!(table.build(&env).expect("build").is_empty());
    }

    #[test]
    fn test_table_roundtrips_through_json() {
        let table = VerificationDefaults::cts();
        let json = serde_json::to_string(&table).expect("serialize");
        let back: VerificationDefaults = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.sensors.len(), 12);
        assert_eq!(
            back.for_sensor(SensorType::GameRotationVector)
                .and_then(|d| d.mean.as_ref())
                .map(|m| m.expected.clone()),
            Some(vec![0.0, 0.0, 0.0, 1.0, 0.0])
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"sensors":[{"sensor_type":"gyroscope","event_ordering":true}]}"#;
        let table: VerificationDefaults = serde_json::from_str(json).expect("deserialize");
        assert_eq!(table.frequency_upper_pct, 110.0);
        assert!(table.for_sensor(SensorType::Gyroscope).is_some_and(|d| d.event_ordering));
    }
}

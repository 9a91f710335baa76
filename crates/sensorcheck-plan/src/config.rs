//! Declarative plan configuration and identity.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use sensorcheck_core::verification::{
    EventGapVerification, EventOrderingVerification, FrequencyVerification, JitterVerification,
    MagnitudeVerification, MeanVerification, SigNumVerification, StandardDeviationVerification,
    TimestampSynchronizationVerification,
};
use sensorcheck_core::{
    CaptureStrategy, CaptureTimeouts, ConfigError, EventSource, RawSensorEvent, SamplingRate,
    ScriptedSource, SensorDescriptor, SensorVerification, SyntheticSignal, SyntheticSource,
    TestSensorEnvironment, VerificationDefaults,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PlanError, Result};

/// A complete test plan: where events come from and what to run against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    /// Human-readable plan name.
    pub name: String,

    #[serde(default)]
    pub source: SourceConfig,

    /// Root of the operation tree.
    pub operation: OperationConfig,

    /// Default-verification table for tests with `use_defaults`.
    /// Falls back to [`VerificationDefaults::cts`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<VerificationDefaults>,
}

impl PlanSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// SHA-256 (hex) of the plan's canonical JSON.
    ///
    /// Object keys are emitted in sorted order, so two plans that differ only
    /// in key order share a digest.
    pub fn plan_digest(&self) -> Result<String> {
        let canonical = serde_json::to_string(&serde_json::to_value(self)?)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// The table used for `use_defaults`.
    pub fn defaults_table(&self) -> VerificationDefaults {
        self.defaults.clone().unwrap_or_else(VerificationDefaults::cts)
    }
}

/// Event source backing every test in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Periodic generator; sensors without a signal read `[0, 0, 0]`.
    Synthetic {
        #[serde(default)]
        signals: BTreeMap<String, SyntheticSignal>,
    },
    /// Replays fixed channel values spaced `period_ns` apart.
    Scripted {
        period_ns: i64,
        values: Vec<Vec<f32>>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Synthetic {
            signals: BTreeMap::new(),
        }
    }
}

impl SourceConfig {
    pub fn build(&self) -> Arc<dyn EventSource> {
        match self {
            SourceConfig::Synthetic { signals } => Arc::new(
                signals
                    .iter()
                    .fold(SyntheticSource::new(), |source, (name, signal)| {
                        source.with_signal(name.clone(), signal.clone())
                    }),
            ),
            SourceConfig::Scripted {
                period_ns,
                values,
                interval_ms,
            } => {
                let script = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| RawSensorEvent::new(i as i64 * period_ns, v.clone()))
                    .collect();
                let source = ScriptedSource::new(script);
                match interval_ms {
                    Some(ms) => Arc::new(source.with_interval(std::time::Duration::from_millis(*ms))),
                    None => Arc::new(source),
                }
            }
        }
    }
}

/// One node of the operation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationConfig {
    Test(TestConfig),
    Sequential {
        operations: Vec<OperationConfig>,
    },
    Parallel {
        operations: Vec<OperationConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Repeating {
        operation: Box<OperationConfig>,
        iterations: usize,
    },
    Delay {
        operation: Box<OperationConfig>,
        delay_ms: u64,
    },
}

fn default_sampling_rate() -> SamplingRate {
    SamplingRate::Fastest
}

/// A single capture-and-verify pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub sensor: SensorDescriptor,

    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: SamplingRate,

    #[serde(default)]
    pub max_report_latency_us: u32,

    pub capture: CaptureStrategy,

    #[serde(default)]
    pub timeouts: CaptureTimeouts,

    /// Add the plan's default verifications for this sensor type.
    #[serde(default)]
    pub use_defaults: bool,

    #[serde(default)]
    pub verifications: Vec<VerificationConfig>,

    /// Trace every captured event.
    #[serde(default)]
    pub log_events: bool,
}

impl TestConfig {
    pub fn environment(&self, source: Arc<dyn EventSource>) -> TestSensorEnvironment {
        TestSensorEnvironment::new(source, self.sensor.clone(), self.sampling_rate)
            .with_max_report_latency_us(self.max_report_latency_us)
    }
}

/// An explicitly configured verification.
///
/// Rate-dependent kinds derive their expected period from the test's
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerificationConfig {
    EventOrdering,
    Frequency {
        /// Overrides the frequency implied by the sampling rate.
        #[serde(default)]
        expected_hz: Option<f64>,
        #[serde(default = "default_lower_pct")]
        lower_pct: f64,
        #[serde(default = "default_upper_pct")]
        upper_pct: f64,
    },
    Jitter {
        threshold_pct: u32,
    },
    Magnitude {
        expected: f32,
        threshold: f32,
    },
    Mean {
        expected: Vec<f32>,
        threshold: Vec<f32>,
    },
    StandardDeviation {
        threshold: Vec<f32>,
    },
    SigNum {
        expected: Vec<i8>,
        threshold: Vec<f32>,
    },
    EventGap,
    TimestampSynchronization {
        #[serde(default)]
        tolerance_ns: Option<i64>,
    },
}

fn default_lower_pct() -> f64 {
    sensorcheck_core::verification::frequency::DEFAULT_LOWER_THRESHOLD_PCT
}

fn default_upper_pct() -> f64 {
    sensorcheck_core::verification::frequency::DEFAULT_UPPER_THRESHOLD_PCT
}

fn expected_period_ns(env: &TestSensorEnvironment) -> std::result::Result<i64, ConfigError> {
    Ok(i64::from(env.expected_sampling_period_us()?) * 1_000)
}

impl VerificationConfig {
    pub fn build(
        &self,
        env: &TestSensorEnvironment,
    ) -> std::result::Result<Box<dyn SensorVerification>, ConfigError> {
        Ok(match self {
            VerificationConfig::EventOrdering => Box::new(EventOrderingVerification::new()),
            VerificationConfig::Frequency {
                expected_hz,
                lower_pct,
                upper_pct,
            } => {
                let expected = match expected_hz {
                    Some(hz) => *hz,
                    None => env.expected_frequency_hz()?,
                };
                Box::new(FrequencyVerification::with_percent_thresholds(
                    expected, *lower_pct, *upper_pct,
                ))
            }
            VerificationConfig::Jitter { threshold_pct } => {
                Box::new(JitterVerification::new(expected_period_ns(env)?, *threshold_pct))
            }
            VerificationConfig::Magnitude {
                expected,
                threshold,
            } => Box::new(MagnitudeVerification::new(*expected, *threshold)),
            VerificationConfig::Mean {
                expected,
                threshold,
            } => Box::new(MeanVerification::new(expected.clone(), threshold.clone())?),
            VerificationConfig::StandardDeviation { threshold } => {
                Box::new(StandardDeviationVerification::new(threshold.clone()))
            }
            VerificationConfig::SigNum {
                expected,
                threshold,
            } => Box::new(SigNumVerification::new(expected.clone(), threshold.clone())?),
            VerificationConfig::EventGap => {
                Box::new(EventGapVerification::new(expected_period_ns(env)?))
            }
            VerificationConfig::TimestampSynchronization { tolerance_ns } => {
                let unit = TimestampSynchronizationVerification::new(
                    expected_period_ns(env)?,
                    i64::from(env.max_report_latency_us()) * 1_000,
                );
                Box::new(match tolerance_ns {
                    Some(ns) => unit.with_tolerance_ns(*ns),
                    None => unit,
                })
            }
        })
    }
}

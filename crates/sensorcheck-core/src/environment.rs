//! Capture parameters shared by an operation and its verifications.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::{ReportingMode, SensorDescriptor};
use crate::source::{EventSource, RegistrationRequest};

/// Sampling period used for [`SamplingRate::Game`].
pub const SENSOR_DELAY_GAME_US: u32 = 20_000;
/// Sampling period used for [`SamplingRate::Ui`].
pub const SENSOR_DELAY_UI_US: u32 = 66_667;
/// Sampling period used for [`SamplingRate::Normal`].
pub const SENSOR_DELAY_NORMAL_US: u32 = 200_000;

/// Requested sampling rate.
///
/// `Game`, `Ui` and `Normal` are symbolic rates with no numeric contract;
/// rate-dependent verifications are skipped for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingRate {
    Fastest,
    Game,
    Ui,
    Normal,
    PeriodUs(u32),
}

impl SamplingRate {
    /// Whether the rate carries a numeric period that can be verified.
    pub fn is_testable(&self) -> bool {
        matches!(self, SamplingRate::Fastest | SamplingRate::PeriodUs(_))
    }

    /// Period in microseconds that the source is asked for.
    pub fn delay_us(&self, sensor: &SensorDescriptor) -> u32 {
        match self {
            SamplingRate::Fastest => sensor.min_delay_us,
            SamplingRate::Game => SENSOR_DELAY_GAME_US,
            SamplingRate::Ui => SENSOR_DELAY_UI_US,
            SamplingRate::Normal => SENSOR_DELAY_NORMAL_US,
            SamplingRate::PeriodUs(us) => *us,
        }
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingRate::Fastest => f.write_str("fastest"),
            SamplingRate::Game => f.write_str("game"),
            SamplingRate::Ui => f.write_str("ui"),
            SamplingRate::Normal => f.write_str("normal"),
            SamplingRate::PeriodUs(us) => write!(f, "{us}us"),
        }
    }
}

/// Immutable capture configuration.
#[derive(Clone)]
pub struct TestSensorEnvironment {
    sensor: Arc<SensorDescriptor>,
    source: Arc<dyn EventSource>,
    sampling_rate: SamplingRate,
    max_report_latency_us: u32,
    sensor_might_have_more_listeners: bool,
}

impl TestSensorEnvironment {
    pub fn new(
        source: Arc<dyn EventSource>,
        sensor: SensorDescriptor,
        sampling_rate: SamplingRate,
    ) -> Self {
        Self {
            sensor: Arc::new(sensor),
            source,
            sampling_rate,
            max_report_latency_us: 0,
            sensor_might_have_more_listeners: false,
        }
    }

    /// Request batched delivery with the given maximum report latency.
    pub fn with_max_report_latency_us(mut self, latency_us: u32) -> Self {
        self.max_report_latency_us = latency_us;
        self
    }

    /// Mark the sensor as possibly shared with other listeners.
    pub fn with_other_listeners(mut self, might_have_more: bool) -> Self {
        self.sensor_might_have_more_listeners = might_have_more;
        self
    }

    pub fn sensor(&self) -> &Arc<SensorDescriptor> {
        &self.sensor
    }

    pub fn source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    pub fn max_report_latency_us(&self) -> u32 {
        self.max_report_latency_us
    }

    pub fn is_continuous(&self) -> bool {
        self.sensor.reporting_mode == ReportingMode::Continuous
    }

    /// Period requested from the source in microseconds.
    pub fn requested_sampling_period_us(&self) -> u32 {
        self.sampling_rate.delay_us(&self.sensor)
    }

    /// Whether other listeners may drive the sensor faster than requested.
    pub fn is_sampling_rate_overloaded(&self) -> bool {
        self.sensor_might_have_more_listeners && self.sampling_rate != SamplingRate::Fastest
    }

    /// The period the sensor is expected to honour, clamped to its limits.
    pub fn expected_sampling_period_us(&self) -> Result<u32, ConfigError> {
        if !self.sampling_rate.is_testable() {
            return Err(ConfigError::UntestableRate(self.sampling_rate.to_string()));
        }
        let mut expected = self.requested_sampling_period_us();
        if self.sensor.max_delay_us > 0 {
            expected = expected.min(self.sensor.max_delay_us);
        }
        Ok(expected.max(self.sensor.min_delay_us))
    }

    /// Frequency implied by [`Self::expected_sampling_period_us`], in Hz.
    pub fn expected_frequency_hz(&self) -> Result<f64, ConfigError> {
        let period_us = self.expected_sampling_period_us()?;
        Ok(frequency_hz_from_period_us(f64::from(period_us)))
    }

    /// Period used to bound capture waits: the expected period when the rate
    /// is testable, otherwise the requested one.
    pub fn capture_period_us(&self) -> u32 {
        self.expected_sampling_period_us()
            .unwrap_or_else(|_| self.requested_sampling_period_us())
    }

    pub fn registration_request(&self) -> RegistrationRequest {
        RegistrationRequest {
            sampling_period_us: self.requested_sampling_period_us(),
            max_report_latency_us: self.max_report_latency_us,
        }
    }

    /// Prefix a failure message with the capture context.
    pub fn format_assertion_message(&self, label: &str, message: &str) -> String {
        format!(
            "{label} | sensor='{}', samplingPeriod={}, maxReportLatency={}us | {message}",
            self.sensor.name, self.sampling_rate, self.max_report_latency_us
        )
    }
}

impl fmt::Debug for TestSensorEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSensorEnvironment")
            .field("sensor", &self.sensor.name)
            .field("sampling_rate", &self.sampling_rate)
            .field("max_report_latency_us", &self.max_report_latency_us)
            .finish_non_exhaustive()
    }
}

/// Convert a period in microseconds to a frequency in Hz.
pub fn frequency_hz_from_period_us(period_us: f64) -> f64 {
    1_000_000.0 / period_us
}

/// Convert a period in nanoseconds to a frequency in Hz.
pub fn frequency_hz_from_period_ns(period_ns: f64) -> f64 {
    1_000_000_000.0 / period_ns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SensorType;
    use crate::fakes::ScriptedSource;

    fn env(rate: SamplingRate) -> TestSensorEnvironment {
        let sensor = SensorDescriptor::new(SensorType::Accelerometer, "accel", 5_000)
            .with_max_delay_us(100_000);
        TestSensorEnvironment::new(Arc::new(ScriptedSource::new(Vec::new())), sensor, rate)
    }

    #[test]
    fn test_symbolic_rates_are_not_testable() {
        assert!(!SamplingRate::Game.is_testable());
        assert!(!SamplingRate::Ui.is_testable());
        assert!(!SamplingRate::Normal.is_testable());
        assert!(SamplingRate::Fastest.is_testable());
        assert!(SamplingRate::PeriodUs(10_000).is_testable());
        assert!(env(SamplingRate::Ui).expected_sampling_period_us().is_err());
    }

    #[test]
    fn test_expected_period_is_clamped() {
        assert_eq!(env(SamplingRate::Fastest).expected_sampling_period_us(), Ok(5_000));
        assert_eq!(env(SamplingRate::PeriodUs(1_000)).expected_sampling_period_us(), Ok(5_000));
        assert_eq!(
            env(SamplingRate::PeriodUs(500_000)).expected_sampling_period_us(),
            Ok(100_000)
        );
        assert_eq!(env(SamplingRate::PeriodUs(20_000)).expected_sampling_period_us(), Ok(20_000));
    }

    #[test]
    fn test_frequency_conversion() {
        let hz = env(SamplingRate::PeriodUs(20_000)).expected_frequency_hz().expect("testable");
        assert!((hz - 50.0).abs() < 1e-9);
        assert!((frequency_hz_from_period_ns(1_000_000.0) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_expected_frequency_follows_clamped_period() {
        let hz = env(SamplingRate::PeriodUs(1_000)).expected_frequency_hz().expect("testable");
        assert!((hz - 200.0).abs() < 1e-9);
        assert!(env(SamplingRate::Ui).expected_frequency_hz().is_err());
    }

    #[test]
    fn test_capture_period_prefers_clamped_period() {
        assert_eq!(env(SamplingRate::PeriodUs(1_000)).capture_period_us(), 5_000);
        let ui = env(SamplingRate::Ui);
        assert_eq!(ui.capture_period_us(), ui.requested_sampling_period_us());
    }

    #[test]
    fn test_overloaded_only_when_shared_and_not_fastest() {
        assert!(env(SamplingRate::Game).with_other_listeners(true).is_sampling_rate_overloaded());
        assert!(!env(SamplingRate::Fastest).with_other_listeners(true).is_sampling_rate_overloaded());
        assert!(!env(SamplingRate::Game).is_sampling_rate_overloaded());
    }

    #[test]
    fn test_sampling_rate_serde() {
        let rate: SamplingRate = serde_json::from_str("{\"period_us\":20000}").expect("deserialize");
        assert_eq!(rate, SamplingRate::PeriodUs(20_000));
        let rate: SamplingRate = serde_json::from_str("\"fastest\"").expect("deserialize");
        assert_eq!(rate, SamplingRate::Fastest);
    }
}

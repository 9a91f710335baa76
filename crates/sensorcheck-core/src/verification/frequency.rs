//! Observed sampling rate check.

use crate::environment::{frequency_hz_from_period_ns, TestSensorEnvironment};
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::stats::{SensorStats, FREQUENCY_KEY};

use super::{passed_key, SensorVerification};

const NAME: &str = "frequency";

/// Default lower bound: `expected - 10%`.
pub const DEFAULT_LOWER_THRESHOLD_PCT: f64 = 10.0;
/// Default upper bound: `expected + 110%`.
pub const DEFAULT_UPPER_THRESHOLD_PCT: f64 = 110.0;

/// Fails when `(count - 1) / (max_ts - min_ts)` falls outside
/// `(expected - lower, expected + upper)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyVerification {
    expected_hz: f64,
    lower_threshold_hz: f64,
    upper_threshold_hz: f64,
}

impl FrequencyVerification {
    pub fn new(expected_hz: f64, lower_threshold_hz: f64, upper_threshold_hz: f64) -> Self {
        Self {
            expected_hz,
            lower_threshold_hz,
            upper_threshold_hz,
        }
    }

    /// Thresholds given as percentages of the expected frequency.
    pub fn with_percent_thresholds(expected_hz: f64, lower_pct: f64, upper_pct: f64) -> Self {
        Self::new(
            expected_hz,
            expected_hz * lower_pct / 100.0,
            expected_hz * upper_pct / 100.0,
        )
    }

    pub fn expected_hz(&self) -> f64 {
        self.expected_hz
    }
}

impl SensorVerification for FrequencyVerification {
    fn name(&self) -> &'static str {
        NAME
    }

    fn verify(
        &self,
        _env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Result<(), VerificationFailure> {
        if events.len() < 2 {
            stats.add_value(passed_key(NAME), true);
            return Ok(());
        }

        let (min_ts, max_ts) = events.iter().fold((i64::MAX, i64::MIN), |(lo, hi), e| {
            (lo.min(e.timestamp_ns), hi.max(e.timestamp_ns))
        });
        let mean_period_ns = (max_ts - min_ts) as f64 / (events.len() - 1) as f64;
        let frequency = frequency_hz_from_period_ns(mean_period_ns);
        let failed = frequency <= self.expected_hz - self.lower_threshold_hz
            || frequency >= self.expected_hz + self.upper_threshold_hz;

        stats.add_value(FREQUENCY_KEY, frequency);
        stats.add_value(passed_key(NAME), !failed);

        if failed {
            return Err(VerificationFailure::new(
                NAME,
                format!(
                    "Frequency out of range: frequency={:.2}Hz (expected ({:.2}-{:.2}Hz, {:.2}+{:.2}Hz))",
                    frequency,
                    self.expected_hz,
                    self.lower_threshold_hz,
                    self.expected_hz,
                    self.upper_threshold_hz
                ),
            ));
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SamplingRate;
    use crate::stats::StatValue;
    use crate::verification::test_support::{at_timestamps, env};

    fn verify(v: &FrequencyVerification, timestamps: &[i64]) -> (Result<(), VerificationFailure>, SensorStats) {
        let mut stats = SensorStats::new();
        let result = v.verify(&env(SamplingRate::PeriodUs(20_000)), &at_timestamps(timestamps), &mut stats);
        (result, stats)
    }

    #[test]
    fn test_within_range_passes() {
        // 50Hz expected, events every 20ms
        let v = FrequencyVerification::with_percent_thresholds(50.0, 10.0, 110.0);
        let (result, stats) = verify(&v, &[0, 20_000_000, 40_000_000, 60_000_000]);
        assert!(result.is_ok());
        let f = stats.value(FREQUENCY_KEY).and_then(StatValue::as_f64).expect("frequency");
        assert!((f - 50.0).abs() < 1e-9);
        assert_eq!(stats.value("frequency_passed"), Some(&StatValue::Bool(true)));
    }

    #[test]
    fn test_lower_bound_is_exclusive() {
        // 40Hz observed with a lower bound of exactly 40Hz fails.
        let v = FrequencyVerification::new(50.0, 10.0, 55.0);
        let (result, stats) = verify(&v, &[0, 25_000_000, 50_000_000]);
        let failure = result.unwrap_err();
        assert_eq!(
            failure.message,
            "Frequency out of range: frequency=40.00Hz (expected (50.00-10.00Hz, 50.00+55.00Hz))"
        );
        assert_eq!(stats.value("frequency_passed"), Some(&StatValue::Bool(false)));
    }

    #[test]
    fn test_too_fast_fails() {
        let v = FrequencyVerification::with_percent_thresholds(50.0, 10.0, 110.0);
        // 200Hz is above 50 + 55
        let (result, _) = verify(&v, &[0, 5_000_000, 10_000_000]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fewer_than_two_events_pass_without_metric() {
        let v = FrequencyVerification::new(50.0, 5.0, 55.0);
        let (result, stats) = verify(&v, &[0]);
        assert!(result.is_ok());
        assert!(!stats.contains_key(FREQUENCY_KEY));
        assert_eq!(stats.value("frequency_passed"), Some(&StatValue::Bool(true)));
    }
}

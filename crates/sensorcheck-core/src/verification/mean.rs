//! Per-channel mean check.

use crate::environment::TestSensorEnvironment;
use crate::error::{ConfigError, VerificationFailure};
use crate::event::SensorEvent;
use crate::helpers::channel_means;
use crate::stats::{SensorStats, MEAN_KEY};

use super::{passed_key, SensorVerification};

const NAME: &str = "mean";

/// Fails when any channel's mean differs from its expected value by more
/// than that channel's threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanVerification {
    expected: Vec<f32>,
    threshold: Vec<f32>,
}

impl MeanVerification {
    pub fn new(expected: Vec<f32>, threshold: Vec<f32>) -> Result<Self, ConfigError> {
        if expected.len() != threshold.len() {
            return Err(ConfigError::ChannelMismatch {
                what: "mean threshold",
                expected: expected.len(),
                actual: threshold.len(),
            });
        }
        Ok(Self { expected, threshold })
    }
}

/// Format values as `(a, b, c)`, or a bare value for a single channel.
pub(crate) fn format_channels(values: impl IntoIterator<Item = String>) -> String {
    let parts: Vec<String> = values.into_iter().collect();
    if parts.len() == 1 {
        return parts.into_iter().next().unwrap_or_default();
    }
    format!("({})", parts.join(", "))
}

impl SensorVerification for MeanVerification {
    fn name(&self) -> &'static str {
        NAME
    }

    fn verify(
        &self,
        _env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Result<(), VerificationFailure> {
        if events.is_empty() {
            stats.add_value(passed_key(NAME), true);
            return Ok(());
        }

        let means = channel_means(events, self.expected.len());
        let failed = means
            .iter()
            .zip(self.expected.iter().zip(&self.threshold))
            .any(|(m, (e, t))| (m - f64::from(*e)).abs() > f64::from(*t));

        stats.add_value(passed_key(NAME), !failed);
        stats.add_value(MEAN_KEY, means.clone());

        if failed {
            let observed = format_channels(means.iter().map(|m| format!("{m:.2}")));
            let expected = format_channels(
                self.expected
                    .iter()
                    .zip(&self.threshold)
                    .map(|(e, t)| format!("{e:.2}+/-{t:.2}")),
            );
            return Err(VerificationFailure::new(
                NAME,
                format!("Mean out of range: mean={observed} (expected {expected})"),
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
    use crate::verification::test_support::{env, with_values};

    fn unit() -> MeanVerification {
        MeanVerification::new(vec![0.0, 0.0, 0.0], vec![0.1, 0.1, 0.1]).expect("valid")
    }

    #[test]
    fn test_channel_count_must_match() {
        assert!(matches!(
            MeanVerification::new(vec![0.0; 3], vec![0.1; 2]),
            Err(ConfigError::ChannelMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn test_small_means_pass() {
        let mut stats = SensorStats::new();
        let events = with_values(vec![vec![0.05, 0.02, -0.03]; 5]);
        unit()
            .verify(&env(SamplingRate::Fastest), &events, &mut stats)
            .expect("within threshold");
        let mean = stats.value(MEAN_KEY).and_then(StatValue::as_float_array).expect("mean");
        assert!((mean[0] - 0.05).abs() < 1e-6);
        assert!((mean[2] + 0.03).abs() < 1e-6);
    }

    #[test]
    fn test_channel_zero_mismatch_is_reported() {
        let mut stats = SensorStats::new();
        let events = with_values(vec![vec![0.5, 0.0, 0.0]; 5]);
        let failure = unit()
            .verify(&env(SamplingRate::Fastest), &events, &mut stats)
            .unwrap_err();
        assert_eq!(
            failure.message,
            "Mean out of range: mean=(0.50, 0.00, 0.00) (expected (0.00+/-0.10, 0.00+/-0.10, 0.00+/-0.10))"
        );
        assert_eq!(stats.value(MEAN_KEY), Some(&StatValue::FloatArray(vec![0.5, 0.0, 0.0])));
    }

    #[test]
    fn test_single_channel_format() {
        assert_eq!(format_channels(vec!["1.00".to_string()]), "1.00");
        assert_eq!(format_channels(vec!["1".to_string(), "2".to_string()]), "(1, 2)");
    }
}

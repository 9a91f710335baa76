//! Per-channel sign-of-mean check.

use crate::environment::TestSensorEnvironment;
use crate::error::{ConfigError, VerificationFailure};
use crate::event::SensorEvent;
use crate::helpers::channel_means;
use crate::stats::{SensorStats, MEAN_KEY};

use super::mean::format_channels;
use super::{passed_key, SensorVerification};

const NAME: &str = "sig_num";

/// Checks the sign of each channel's mean against an expected sign.
///
/// For expected `0` the mean must lie within `[-threshold, threshold]`; for
/// `1` it must exceed `threshold`; for `-1` it must be below `-threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct SigNumVerification {
    expected: Vec<i8>,
    threshold: Vec<f32>,
}

impl SigNumVerification {
    pub fn new(expected: Vec<i8>, threshold: Vec<f32>) -> Result<Self, ConfigError> {
        if let Some(bad) = expected.iter().find(|e| !matches!(e, -1..=1)) {
            return Err(ConfigError::InvalidSign(*bad));
        }
        if expected.len() != threshold.len() {
            return Err(ConfigError::ChannelMismatch {
                what: "sig num threshold",
                expected: expected.len(),
                actual: threshold.len(),
            });
        }
        Ok(Self { expected, threshold })
    }
}

impl SensorVerification for SigNumVerification {
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
        let mut failed = false;
        let mut bands = Vec::with_capacity(means.len());
        for ((mean, expected), threshold) in means.iter().zip(&self.expected).zip(&self.threshold) {
            let t = f64::from(*threshold);
            match expected {
                0 => {
                    failed |= mean.abs() > t;
                    bands.push(format!("[{:.2}, {:.2}]", -t, t));
                }
                1 => {
                    failed |= *mean <= t;
                    bands.push(format!("({t:.2}, inf)"));
                }
                _ => {
                    failed |= *mean >= -t;
                    bands.push(format!("(-inf, {:.2})", -t));
                }
            }
        }

        stats.add_value(passed_key(NAME), !failed);
        stats.add_value(MEAN_KEY, means.clone());

        if failed {
            return Err(VerificationFailure::new(
                NAME,
                format!(
                    "Signum out of range: mean={} (expected {})",
                    format_channels(means.iter().map(|m| format!("{m:.2}"))),
                    format_channels(bands)
                ),
            ));
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

//! Average vector norm check.

use crate::environment::TestSensorEnvironment;
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::helpers::magnitude;
use crate::stats::{SensorStats, MAGNITUDE_KEY};

use super::{passed_key, SensorVerification};

const NAME: &str = "magnitude";

/// Fails when the mean Euclidean norm differs from `expected` by more than `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnitudeVerification {
    expected: f32,
    threshold: f32,
}

impl MagnitudeVerification {
    pub fn new(expected: f32, threshold: f32) -> Self {
        Self { expected, threshold }
    }
}

impl SensorVerification for MagnitudeVerification {
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

        let sum: f64 = events.iter().map(|e| magnitude(&e.values)).sum();
        let average = sum / events.len() as f64;
        let failed = (average - f64::from(self.expected)).abs() > f64::from(self.threshold);

        stats.add_value(passed_key(NAME), !failed);
        stats.add_value(MAGNITUDE_KEY, average);

        if failed {
            return Err(VerificationFailure::new(
                NAME,
                format!(
                    "Magnitude out of range: magnitude={:.2} (expected {:.2}+/-{:.2})",
                    average, self.expected, self.threshold
                ),
            ));
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

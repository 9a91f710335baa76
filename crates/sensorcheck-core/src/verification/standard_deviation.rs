//! Per-channel standard deviation check.

use crate::environment::TestSensorEnvironment;
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::helpers::channel_standard_deviations;
use crate::stats::{SensorStats, STANDARD_DEVIATION_KEY};

use super::mean::format_channels;
use super::{passed_key, SensorVerification};

const NAME: &str = "standard_deviation";

/// Fails when any channel's sample standard deviation exceeds its threshold.
///
/// Use `f32::MAX` as a threshold to record a channel without ever failing it.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardDeviationVerification {
    threshold: Vec<f32>,
}

impl StandardDeviationVerification {
    pub fn new(threshold: Vec<f32>) -> Self {
        Self { threshold }
    }
}

impl SensorVerification for StandardDeviationVerification {
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

        let deviations = channel_standard_deviations(events, self.threshold.len());
        let failed = deviations
            .iter()
            .zip(&self.threshold)
            .any(|(sd, t)| *sd > f64::from(*t));

        stats.add_value(passed_key(NAME), !failed);
        stats.add_value(STANDARD_DEVIATION_KEY, deviations.clone());

        if failed {
            let observed = format_channels(deviations.iter().map(|sd| format!("{sd:.2}")));
            let expected = format_channels(self.threshold.iter().map(|t| format!("{t:.2}")));
            return Err(VerificationFailure::new(
                NAME,
                format!("Standard deviation out of range: std dev={observed} (expected <{expected})"),
            ));
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

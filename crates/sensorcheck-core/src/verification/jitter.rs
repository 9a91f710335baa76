//! Inter-arrival jitter check.

use crate::environment::TestSensorEnvironment;
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::helpers::{mean, percentile_95, timestamp_deltas};
use crate::stats::{SensorStats, JITTER_95_PERCENTILE_KEY};

use super::{passed_key, SensorVerification};

const NAME: &str = "jitter";

/// Fails when the 95th percentile of `|delta - mean(delta)|` exceeds
/// `threshold_pct` percent of the expected period.
///
/// A threshold of `u32::MAX` records the percentile without ever failing in
/// practice.
#[derive(Debug, Clone, PartialEq)]
pub struct JitterVerification {
    expected_period_ns: i64,
    threshold_pct: u32,
}

impl JitterVerification {
    pub fn new(expected_period_ns: i64, threshold_pct: u32) -> Self {
        Self {
            expected_period_ns,
            threshold_pct,
        }
    }

    fn limit_ns(&self) -> f64 {
        self.expected_period_ns as f64 * (f64::from(self.threshold_pct) / 100.0)
    }
}

/// Absolute deviation of each consecutive delta from the mean delta.
pub fn jitter_values(events: &[SensorEvent]) -> Vec<f64> {
    let deltas: Vec<f64> = timestamp_deltas(events).into_iter().map(|d| d as f64).collect();
    let delta_mean = mean(&deltas);
    deltas.iter().map(|d| (d - delta_mean).abs()).collect()
}

impl SensorVerification for JitterVerification {
    fn name(&self) -> &'static str {
        NAME
    }

    fn verify(
        &self,
        _env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Result<(), VerificationFailure> {
        let Some(jitter) = percentile_95(&jitter_values(events)) else {
            stats.add_value(passed_key(NAME), true);
            return Ok(());
        };

        let limit = self.limit_ns();
        let failed = jitter > limit;
        stats.add_value(passed_key(NAME), !failed);
        stats.add_value(JITTER_95_PERCENTILE_KEY, jitter);

        if failed {
            return Err(VerificationFailure::new(
                NAME,
                format!(
                    "Jitter out of range: jitter at 95th percentile={jitter:.0}ns (expected <{limit:.0}ns)"
                ),
            ));
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

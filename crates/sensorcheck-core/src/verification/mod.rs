//! Pluggable checks run against a captured event sequence.
//!
//! A verification receives the capture [`TestSensorEnvironment`], the full
//! ordered event list and the operation's statistics record. It records its
//! metrics (and a `<name>_passed` flag) whether or not the check holds, then
//! returns a [`VerificationFailure`] when it does not.
//!
//! Units hold only their configured parameters, so a clone never shares
//! state with its original.

use std::fmt;

use crate::environment::TestSensorEnvironment;
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::stats::SensorStats;

pub mod defaults;
pub mod event_gap;
pub mod event_ordering;
pub mod frequency;
pub mod jitter;
pub mod magnitude;
pub mod mean;
pub mod sig_num;
pub mod standard_deviation;
pub mod timestamp_sync;

pub use defaults::{MagnitudeDefault, MeanDefault, SensorDefaults, VerificationDefaults};
pub use event_gap::EventGapVerification;
pub use event_ordering::EventOrderingVerification;
pub use frequency::FrequencyVerification;
pub use jitter::JitterVerification;
pub use magnitude::MagnitudeVerification;
pub use mean::MeanVerification;
pub use sig_num::SigNumVerification;
pub use standard_deviation::StandardDeviationVerification;
pub use timestamp_sync::TimestampSynchronizationVerification;

/// A single statistical or ordering check.
pub trait SensorVerification: Send + Sync + fmt::Debug {
    /// Stable identifier; two units with the same name cover the same concern.
    fn name(&self) -> &'static str;

    /// Run the check, recording metrics into `stats`.
    fn verify(
        &self,
        env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Result<(), VerificationFailure>;

    /// Independent copy with identical parameters.
    fn clone_box(&self) -> Box<dyn SensorVerification>;
}

impl Clone for Box<dyn SensorVerification> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Key of the `<name>_passed` flag written by a verification.
pub fn passed_key(name: &str) -> String {
    format!("{name}_passed")
}

/// Ordered collection of verifications with at most one unit per concern.
#[derive(Debug, Clone, Default)]
pub struct VerificationSet {
    units: Vec<Box<dyn SensorVerification>>,
}

impl VerificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `unit` unless a unit with the same name is already registered.
    ///
    /// Returns `false` when the unit was rejected as a duplicate.
    pub fn add(&mut self, unit: Box<dyn SensorVerification>) -> bool {
        if self.contains(unit.name()) {
            tracing::warn!(verification = unit.name(), "duplicate verification ignored");
            return false;
        }
        self.units.push(unit);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.iter().any(|u| u.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Run every unit, never stopping at the first failure.
    pub fn verify_all(
        &self,
        env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Vec<VerificationFailure> {
        self.units
            .iter()
            .filter_map(|unit| unit.verify(env, events, stats).err())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::environment::{SamplingRate, TestSensorEnvironment};
    use crate::event::{RawSensorEvent, SensorDescriptor, SensorEvent, SensorType};
    use crate::fakes::ScriptedSource;

    pub fn env(rate: SamplingRate) -> TestSensorEnvironment {
        let sensor = SensorDescriptor::new(SensorType::Accelerometer, "accel", 1_000);
        TestSensorEnvironment::new(Arc::new(ScriptedSource::new(Vec::new())), sensor, rate)
    }

    /// Events with the given timestamps and constant values.
    pub fn at_timestamps(timestamps: &[i64]) -> Vec<SensorEvent> {
        let sensor = Arc::new(SensorDescriptor::new(SensorType::Accelerometer, "accel", 1_000));
        timestamps
            .iter()
            .map(|ts| SensorEvent::from_raw(sensor.clone(), RawSensorEvent::new(*ts, vec![0.0; 3]), *ts))
            .collect()
    }

    /// Events one millisecond apart with the given values.
    pub fn with_values(values: Vec<Vec<f32>>) -> Vec<SensorEvent> {
        let sensor = Arc::new(SensorDescriptor::new(SensorType::Accelerometer, "accel", 1_000));
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let ts = i as i64 * 1_000_000;
                SensorEvent::from_raw(sensor.clone(), RawSensorEvent::new(ts, v), ts)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{at_timestamps, env};
    use super::*;
    use crate::environment::SamplingRate;

    #[test]
    fn test_set_rejects_duplicate_concern() {
        let mut set = VerificationSet::new();
        assert!(set.add(Box::new(EventOrderingVerification::new())));
        assert!(!set.add(Box::new(EventOrderingVerification::new())));
        assert!(set.add(Box::new(FrequencyVerification::new(50.0, 5.0, 55.0))));
        assert_eq!(set.names(), vec!["event_order", "frequency"]);
    }

    #[test]
    fn test_verify_all_is_fail_soft() {
        let mut set = VerificationSet::new();
        set.add(Box::new(EventOrderingVerification::new()));
        set.add(Box::new(FrequencyVerification::new(1.0, 0.1, 1.1)));
        set.add(Box::new(JitterVerification::new(1_000_000, u32::MAX)));

        let events = at_timestamps(&[0, 2_000_000, 1_000_000, 3_000_000]);
        let mut stats = SensorStats::new();
        let failures = set.verify_all(&env(SamplingRate::PeriodUs(1_000)), &events, &mut stats);

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].verification, "event_order");
        assert_eq!(failures[1].verification, "frequency");
        assert!(stats.contains_key("jitter_passed"));
        assert!(stats.contains_key("jitter_95_percentile"));
    }

    #[test]
    fn test_cloned_set_is_independent() {
        let mut set = VerificationSet::new();
        set.add(Box::new(MagnitudeVerification::new(9.8, 0.5)));
        let cloned = set.clone();
        set.add(Box::new(EventOrderingVerification::new()));
        assert_eq!(cloned.len(), 1);
        assert_eq!(set.len(), 2);
    }
}

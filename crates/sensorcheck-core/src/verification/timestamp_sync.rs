//! Source timestamp versus receipt time check.

use crate::environment::TestSensorEnvironment;
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::stats::{
    SensorStats, EVENT_TIME_SYNCHRONIZATION_COUNT_KEY, EVENT_TIME_SYNCHRONIZATION_POSITIONS_KEY,
};

use super::{passed_key, SensorVerification};

const NAME: &str = "timestamp_synchronization";

/// Default allowed clock skew between source and receiver.
pub const DEFAULT_TOLERANCE_NS: i64 = 500_000_000;

const MESSAGE_LENGTH: usize = 3;

/// Fails when an event's source timestamp is ahead of its receipt time by
/// more than the tolerance, or when it was received later than
/// `max_report_latency + expected_period + tolerance` after it was stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampSynchronizationVerification {
    expected_period_ns: i64,
    max_report_latency_ns: i64,
    tolerance_ns: i64,
}

impl TimestampSynchronizationVerification {
    pub fn new(expected_period_ns: i64, max_report_latency_ns: i64) -> Self {
        Self {
            expected_period_ns,
            max_report_latency_ns,
            tolerance_ns: DEFAULT_TOLERANCE_NS,
        }
    }

    pub fn with_tolerance_ns(mut self, tolerance_ns: i64) -> Self {
        self.tolerance_ns = tolerance_ns;
        self
    }

    fn max_delay_ns(&self) -> i64 {
        self.max_report_latency_ns + self.expected_period_ns + self.tolerance_ns
    }
}

impl SensorVerification for TimestampSynchronizationVerification {
    fn name(&self) -> &'static str {
        NAME
    }

    fn verify(
        &self,
        _env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Result<(), VerificationFailure> {
        let max_delay = self.max_delay_ns();
        let offending: Vec<(usize, &SensorEvent)> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                let skew = e.received_timestamp_ns - e.timestamp_ns;
                skew < -self.tolerance_ns || skew > max_delay
            })
            .collect();

        stats.add_value(passed_key(NAME), offending.is_empty());
        stats.add_value(EVENT_TIME_SYNCHRONIZATION_COUNT_KEY, offending.len());
        stats.add_value(
            EVENT_TIME_SYNCHRONIZATION_POSITIONS_KEY,
            offending.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        );

        if offending.is_empty() {
            return Ok(());
        }

        let listed: Vec<String> = offending
            .iter()
            .take(MESSAGE_LENGTH)
            .map(|(i, e)| {
                format!(
                    "position={i}, timestamp={}ns, received={}ns",
                    e.timestamp_ns, e.received_timestamp_ns
                )
            })
            .collect();
        let mut message = format!(
            "{} timestamp synchronization failures: {}",
            offending.len(),
            listed.join("; ")
        );
        if offending.len() > MESSAGE_LENGTH {
            message.push_str(&format!("; {} more", offending.len() - MESSAGE_LENGTH));
        }
        Err(VerificationFailure::new(NAME, message))
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SamplingRate;
    use crate::event::{RawSensorEvent, SensorDescriptor, SensorType};
    use crate::stats::StatValue;
    use crate::verification::test_support::env;
    use std::sync::Arc;

    fn event(timestamp: i64, received: i64) -> SensorEvent {
        let sensor = Arc::new(SensorDescriptor::new(SensorType::Gyroscope, "gyro", 1_000));
        SensorEvent::from_raw(sensor, RawSensorEvent::new(timestamp, vec![0.0]), received)
    }

    #[test]
    fn test_synchronized_events_pass() {
        let mut stats = SensorStats::new();
        let events = vec![event(0, 1_000_000), event(1_000_000, 2_000_000)];
        TimestampSynchronizationVerification::new(1_000_000, 0)
            .verify(&env(SamplingRate::Fastest), &events, &mut stats)
            .expect("in sync");
        assert_eq!(
            stats.value(EVENT_TIME_SYNCHRONIZATION_COUNT_KEY),
            Some(&StatValue::Int(0))
        );
    }

    #[test]
    fn test_future_and_late_events_fail() {
        let mut stats = SensorStats::new();
        let events = vec![
            event(0, 0),
            // stamped 1s after it was received
            event(1_000_000_000, 0),
            // received 2s after it was stamped
            event(2_000_000_000, 4_000_000_000),
        ];
        let failure = TimestampSynchronizationVerification::new(1_000_000, 0)
            .verify(&env(SamplingRate::Fastest), &events, &mut stats)
            .unwrap_err();
        assert!(failure.message.starts_with("2 timestamp synchronization failures: position=1"));
        assert_eq!(
            stats.value(EVENT_TIME_SYNCHRONIZATION_POSITIONS_KEY),
            Some(&StatValue::IntArray(vec![1, 2]))
        );
    }

    #[test]
    fn test_tolerance_is_configurable() {
        let mut stats = SensorStats::new();
        let events = vec![event(100, 0)];
        assert!(TimestampSynchronizationVerification::new(1_000, 0)
            .with_tolerance_ns(10)
            .verify(&env(SamplingRate::Fastest), &events, &mut stats)
            .is_err());
    }
}

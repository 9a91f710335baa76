//! Missing-event detection for continuous streams.

use crate::environment::TestSensorEnvironment;
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::stats::{SensorStats, EVENT_GAP_COUNT_KEY, EVENT_GAP_POSITIONS_KEY};

use super::{passed_key, SensorVerification};

const NAME: &str = "event_gap";

/// A delta larger than this multiple of the expected period counts as a gap.
pub const EVENT_GAP_THRESHOLD_MULTIPLIER: f64 = 1.8;

const MESSAGE_LENGTH: usize = 3;

/// Fails when consecutive events are further apart than
/// [`EVENT_GAP_THRESHOLD_MULTIPLIER`] expected periods.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGapVerification {
    expected_period_ns: i64,
}

impl EventGapVerification {
    pub fn new(expected_period_ns: i64) -> Self {
        Self { expected_period_ns }
    }
}

impl SensorVerification for EventGapVerification {
    fn name(&self) -> &'static str {
        NAME
    }

    fn verify(
        &self,
        _env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Result<(), VerificationFailure> {
        let limit = self.expected_period_ns as f64 * EVENT_GAP_THRESHOLD_MULTIPLIER;
        let gaps: Vec<(usize, i64)> = events
            .windows(2)
            .enumerate()
            .map(|(i, pair)| (i + 1, pair[1].timestamp_ns - pair[0].timestamp_ns))
            .filter(|(_, delta)| *delta as f64 > limit)
            .collect();

        stats.add_value(passed_key(NAME), gaps.is_empty());
        stats.add_value(EVENT_GAP_COUNT_KEY, gaps.len());
        stats.add_value(
            EVENT_GAP_POSITIONS_KEY,
            gaps.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        );

        if gaps.is_empty() {
            return Ok(());
        }

        let listed: Vec<String> = gaps
            .iter()
            .take(MESSAGE_LENGTH)
            .map(|(i, delta)| format!("position={i}, delta_time={delta}ns"))
            .collect();
        let mut message = format!("{} events with gaps: {}", gaps.len(), listed.join("; "));
        if gaps.len() > MESSAGE_LENGTH {
            message.push_str(&format!("; {} more", gaps.len() - MESSAGE_LENGTH));
        }
        Err(VerificationFailure::new(NAME, message))
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

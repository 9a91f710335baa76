//! Monotonic timestamp check.

use crate::environment::TestSensorEnvironment;
use crate::error::VerificationFailure;
use crate::event::SensorEvent;
use crate::stats::{SensorStats, EVENT_OUT_OF_ORDER_COUNT_KEY, EVENT_OUT_OF_ORDER_POSITIONS_KEY};

use super::{passed_key, SensorVerification};

const NAME: &str = "event_order";

/// Number of offending events spelled out in the failure message.
const MESSAGE_LENGTH: usize = 3;

/// Fails when an event carries a timestamp lower than the highest one seen so far.
#[derive(Debug, Clone, Default)]
pub struct EventOrderingVerification;

impl EventOrderingVerification {
    pub fn new() -> Self {
        Self
    }
}

struct OutOfOrder {
    index: usize,
    previous: i64,
    timestamp: i64,
}

impl SensorVerification for EventOrderingVerification {
    fn name(&self) -> &'static str {
        NAME
    }

    fn verify(
        &self,
        _env: &TestSensorEnvironment,
        events: &[SensorEvent],
        stats: &mut SensorStats,
    ) -> Result<(), VerificationFailure> {
        let mut out_of_order = Vec::new();
        let mut max_timestamp: Option<i64> = None;
        for (index, event) in events.iter().enumerate() {
            match max_timestamp {
                Some(max) if event.timestamp_ns < max => out_of_order.push(OutOfOrder {
                    index,
                    previous: events[index - 1].timestamp_ns,
                    timestamp: event.timestamp_ns,
                }),
                Some(max) if event.timestamp_ns <= max => {}
                _ => max_timestamp = Some(event.timestamp_ns),
            }
        }

        stats.add_value(passed_key(NAME), out_of_order.is_empty());
        stats.add_value(EVENT_OUT_OF_ORDER_COUNT_KEY, out_of_order.len());
        stats.add_value(
            EVENT_OUT_OF_ORDER_POSITIONS_KEY,
            out_of_order.iter().map(|e| e.index).collect::<Vec<_>>(),
        );

        if out_of_order.is_empty() {
            return Ok(());
        }

        let listed: Vec<String> = out_of_order
            .iter()
            .take(MESSAGE_LENGTH)
            .map(|e| {
                format!(
                    "position={}, previous={}, timestamp={}",
                    e.index, e.previous, e.timestamp
                )
            })
            .collect();
        let mut message = format!("{} events out of order: {}", out_of_order.len(), listed.join("; "));
        if out_of_order.len() > MESSAGE_LENGTH {
            message.push_str(&format!("; {} more", out_of_order.len() - MESSAGE_LENGTH));
        }
        Err(VerificationFailure::new(NAME, message))
    }

    fn clone_box(&self) -> Box<dyn SensorVerification> {
        Box::new(self.clone())
    }
}

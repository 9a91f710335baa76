use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::Result;
use crate::metrics::METRICS;
use crate::obs::{emit_operation_finished, emit_operation_started, operation_span};
use crate::stats::SensorStats;

use super::{begin, finish, OperationState, SensorOperation};

const KIND: &str = "repeating";

/// Stats key prefix for iteration records.
pub const STATS_TAG: &str = "repeating";

/// Executes `iterations` fresh clones of a template, one at a time.
///
/// The template itself never runs. The first failing iteration ends the run.
#[derive(Debug)]
pub struct RepeatingSensorOperation {
    template: Box<dyn SensorOperation>,
    iterations: usize,
    stats: SensorStats,
    state: OperationState,
}

impl RepeatingSensorOperation {
    pub fn new(template: Box<dyn SensorOperation>, iterations: usize) -> Self {
        Self {
            template,
            iterations,
            stats: SensorStats::new(),
            state: OperationState::Created,
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        for index in 0..self.iterations {
            let mut operation = self.template.clone_operation();
            let result = operation.execute(cancel).await;
            self.stats
                .add_indexed_sensor_stats(STATS_TAG, index, operation.stats().clone());
            result?;
        }
        Ok(())
    }
}

#[async_trait]
impl SensorOperation for RepeatingSensorOperation {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        begin(&mut self.state)?;
        let label = format!("{} x {}", self.iterations, self.template.kind());
        let started = Instant::now();
        METRICS.inc_operations();
        emit_operation_started(KIND, &label);

        let result = self.run(cancel).instrument(operation_span(KIND, &label)).await;

        finish(&mut self.state, &result);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        emit_operation_finished(KIND, &label, duration_ms, result.is_ok());
        result
    }

    fn stats(&self) -> &SensorStats {
        &self.stats
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn clone_operation(&self) -> Box<dyn SensorOperation> {
        Box::new(Self::new(self.template.clone_operation(), self.iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{SamplingRate, TestSensorEnvironment};
    use crate::event::{SensorDescriptor, SensorType};
    use crate::fakes::SyntheticSource;
    use crate::operation::TestSensorOperation;
    use crate::verification::EventOrderingVerification;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_each_iteration_on_a_fresh_clone() {
        let sensor = SensorDescriptor::new(SensorType::Gyroscope, "gyro", 1_000);
        let env = TestSensorEnvironment::new(
            Arc::new(SyntheticSource::new()),
            sensor,
            SamplingRate::Fastest,
        );
        let mut template = TestSensorOperation::by_count(env, 5);
        template.add_verification(EventOrderingVerification::new());

        let mut repeating = RepeatingSensorOperation::new(Box::new(template), 3);
        repeating.execute(&CancellationToken::new()).await.expect("passes");

        assert_eq!(repeating.state(), OperationState::Completed);
        for key in ["repeating_000", "repeating_001", "repeating_002"] {
            let run = repeating.stats().sensor_stats(key).expect("iteration stats");
            assert_eq!(run.value("event_out_of_order_count").and_then(|v| v.as_i64()), Some(0));
        }
    }

    #[tokio::test]
    async fn test_zero_iterations_is_a_no_op() {
        let sensor = SensorDescriptor::new(SensorType::Gyroscope, "gyro", 1_000);
        let env = TestSensorEnvironment::new(
            Arc::new(SyntheticSource::new()),
            sensor,
            SamplingRate::Fastest,
        );
        let mut repeating =
            RepeatingSensorOperation::new(Box::new(TestSensorOperation::by_count(env, 1)), 0);
        repeating.execute(&CancellationToken::new()).await.expect("nothing to run");
        assert!(repeating.stats().is_empty());
    }
}

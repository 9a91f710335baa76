use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{OperationError, Result};
use crate::metrics::METRICS;
use crate::obs::{emit_operation_finished, emit_operation_started, operation_span};
use crate::stats::SensorStats;

use super::{begin, finish, OperationState, SensorOperation};

const KIND: &str = "delay";

/// Stats key for the child record.
pub const STATS_TAG: &str = "delay";

/// Sleeps for a fixed delay, then executes its child.
///
/// Cancellation during the sleep returns [`OperationError::Interrupted`]
/// without starting the child.
#[derive(Debug)]
pub struct DelaySensorOperation {
    operation: Box<dyn SensorOperation>,
    delay: Duration,
    stats: SensorStats,
    state: OperationState,
}

impl DelaySensorOperation {
    pub fn new(operation: Box<dyn SensorOperation>, delay: Duration) -> Self {
        Self {
            operation,
            delay,
            stats: SensorStats::new(),
            state: OperationState::Created,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(OperationError::Interrupted),
        }
        let result = self.operation.execute(cancel).await;
        self.stats
            .add_sensor_stats(STATS_TAG, self.operation.stats().clone());
        result
    }
}

#[async_trait]
impl SensorOperation for DelaySensorOperation {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        begin(&mut self.state)?;
        let label = format!("{}ms then {}", self.delay.as_millis(), self.operation.kind());
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
        Box::new(Self::new(self.operation.clone_operation(), self.delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{SamplingRate, TestSensorEnvironment};
    use crate::event::{SensorDescriptor, SensorType};
    use crate::fakes::ScriptedSource;
    use crate::operation::TestSensorOperation;

    use std::sync::Arc;

    fn child() -> Box<dyn SensorOperation> {
        let source = ScriptedSource::from_values(1_000_000, vec![vec![1.0]; 2]);
        let sensor = SensorDescriptor::new(SensorType::Pressure, "baro", 1_000);
        let env = TestSensorEnvironment::new(Arc::new(source), sensor, SamplingRate::Fastest);
        Box::new(TestSensorOperation::by_count(env, 2))
    }

    #[tokio::test]
    async fn test_runs_child_after_delay() {
        let mut op = DelaySensorOperation::new(child(), Duration::from_millis(20));
        let started = std::time::Instant::now();
        op.execute(&CancellationToken::new()).await.expect("passes");
        assert!(started.elapsed() >= Duration::from_millis(20));
        let nested = op.stats().sensor_stats(STATS_TAG).expect("child stats");
        assert_eq!(nested.value("event_count").and_then(|v| v.as_i64()), Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_delay_skips_child() {
        let mut op = DelaySensorOperation::new(child(), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = op.execute(&cancel).await.unwrap_err();
        assert!(matches!(err, OperationError::Interrupted));
        assert_eq!(op.state(), OperationState::Failed);
        assert!(op.stats().is_empty());
    }
}

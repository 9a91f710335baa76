use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::Result;
use crate::metrics::METRICS;
use crate::obs::{emit_operation_finished, emit_operation_started, operation_span};
use crate::stats::SensorStats;

use super::{begin, finish, OperationState, SensorOperation};

const KIND: &str = "sequential";

/// Stats key prefix for child records.
pub const STATS_TAG: &str = "sequential";

/// Runs children one after another. The first failure stops the run; the
/// failing child's stats are still merged.
#[derive(Debug, Default)]
pub struct SequentialSensorOperation {
    operations: Vec<Box<dyn SensorOperation>>,
    stats: SensorStats,
    state: OperationState,
}

impl SequentialSensorOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, operation: Box<dyn SensorOperation>) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Box<dyn SensorOperation>] {
        &self.operations
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        for (index, operation) in self.operations.iter_mut().enumerate() {
            let result = operation.execute(cancel).await;
            self.stats
                .add_indexed_sensor_stats(STATS_TAG, index, operation.stats().clone());
            result?;
        }
        Ok(())
    }
}

#[async_trait]
impl SensorOperation for SequentialSensorOperation {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        begin(&mut self.state)?;
        let label = format!("{} steps", self.operations.len());
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
        Box::new(Self {
            operations: self.operations.iter().map(|op| op.clone_operation()).collect(),
            ..Self::default()
        })
    }
}

//! Composable, cloneable units of test execution.
//!
//! Every operation owns a [`SensorStats`] record, runs at most once and can
//! be cloned into a fresh, unexecuted copy with identical configuration.
//! Composite operations merge their children's records under indexed keys.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::stats::SensorStats;

pub mod delay;
pub mod parallel;
pub mod repeating;
pub mod sequential;
pub mod test_operation;

pub use delay::DelaySensorOperation;
pub use parallel::ParallelSensorOperation;
pub use repeating::RepeatingSensorOperation;
pub use sequential::SequentialSensorOperation;
pub use test_operation::TestSensorOperation;

/// Lifecycle of an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Created,
    Executing,
    /// Ran to the end; verifications may still have failed.
    Completed,
    /// A runtime fault escaped before the run could finish.
    Failed,
}

/// How a [`TestSensorOperation`] collects events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureStrategy {
    /// Wait until `event_count` events arrived.
    ByCount { event_count: usize },
    /// Capture for a fixed duration.
    ByDuration { duration_ms: u64 },
    /// Capture for a fixed duration, then flush and wait for the acknowledgement.
    ByDurationThenFlush { duration_ms: u64 },
}

#[async_trait]
pub trait SensorOperation: Send + Sync + fmt::Debug {
    /// Short identifier of the operation kind, used for spans and logs.
    fn kind(&self) -> &'static str;

    /// Run the operation once.
    ///
    /// Returns [`crate::error::OperationError::AlreadyExecuted`] on a second
    /// call. Cancelling `cancel` interrupts any blocking wait.
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()>;

    fn stats(&self) -> &SensorStats;

    fn state(&self) -> OperationState;

    /// Fresh, unexecuted copy with the same configuration and empty stats.
    fn clone_operation(&self) -> Box<dyn SensorOperation>;
}

impl Clone for Box<dyn SensorOperation> {
    fn clone(&self) -> Self {
        self.clone_operation()
    }
}

/// Shared `Created -> Executing` transition.
pub(crate) fn begin(state: &mut OperationState) -> Result<()> {
    if *state != OperationState::Created {
        return Err(crate::error::OperationError::AlreadyExecuted);
    }
    *state = OperationState::Executing;
    Ok(())
}

/// Terminal state for a finished run.
pub(crate) fn finish<T>(state: &mut OperationState, result: &Result<T>) {
    *state = match result {
        Err(err) if !err.is_assertion() => OperationState::Failed,
        _ => OperationState::Completed,
    };
}

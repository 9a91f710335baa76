//! Fan-out composer running child operations concurrently.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{AssertionFailure, OperationError, Result};
use crate::metrics::METRICS;
use crate::obs::{emit_branch_timed_out, emit_operation_finished, emit_operation_started, operation_span};
use crate::stats::{SensorStats, ERROR};

use super::{begin, finish, OperationState, SensorOperation};

const KIND: &str = "parallel";

/// Stats key prefix for child records (`parallel_000`, `parallel_001`, ...).
pub const STATS_TAG: &str = "parallel";

/// How long a timed-out branch may take to unwind after cancellation.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(1);

type BranchOutput = (Box<dyn SensorOperation>, Result<()>, Instant);

/// `None` when the branch had to be aborted.
type Joined = Option<std::result::Result<BranchOutput, JoinError>>;

struct Branch {
    index: usize,
    handle: JoinHandle<BranchOutput>,
    cancel: CancellationToken,
    /// Stands in for the child if its task has to be aborted.
    fallback: Box<dyn SensorOperation>,
}

struct BranchFailure {
    index: usize,
    error: OperationError,
    at: Instant,
}

/// Runs every child on its own task and joins them in index order.
///
/// With a timeout, the deadline is fixed when `execute` starts. A child still
/// running at the deadline is cancelled; all such children share one
/// [`DEFAULT_DRAIN_GRACE`] window to unwind, after which the rest are aborted.
/// Their indices are reported as timed out. Child stats are
/// always merged under `parallel_%03d`.
///
/// If the earliest failure (by wall clock) is an assertion, all assertion
/// failures and timeouts are folded into one message. If it is a runtime
/// fault, it is returned as is.
#[derive(Debug)]
pub struct ParallelSensorOperation {
    operations: Vec<Box<dyn SensorOperation>>,
    timeout: Option<Duration>,
    drain_grace: Duration,
    stats: SensorStats,
    state: OperationState,
}

impl Default for ParallelSensorOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelSensorOperation {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            timeout: None,
            drain_grace: DEFAULT_DRAIN_GRACE,
            stats: SensorStats::new(),
            state: OperationState::Created,
        }
    }

    /// Shared deadline for all children, measured from the start of `execute`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Append a child; its position is its index in stats and messages.
    pub fn add(&mut self, operation: Box<dyn SensorOperation>) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Box<dyn SensorOperation>] {
        &self.operations
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn spawn(&mut self, cancel: &CancellationToken) -> Vec<Branch> {
        std::mem::take(&mut self.operations)
            .into_iter()
            .enumerate()
            .map(|(index, mut operation)| {
                let fallback = operation.clone_operation();
                let token = cancel.child_token();
                let child_cancel = token.clone();
                let handle = tokio::spawn(
                    async move {
                        let outcome = AssertUnwindSafe(operation.execute(&child_cancel))
                            .catch_unwind()
                            .await;
                        // failure time is taken inside the task, panics included
                        let at = Instant::now();
                        let result = outcome.unwrap_or_else(|payload| {
                            Err(OperationError::Panicked(panic_message(payload.as_ref())))
                        });
                        (operation, result, at)
                    }
                    .instrument(tracing::debug_span!("branch", index)),
                );
                Branch {
                    index,
                    handle,
                    cancel: token,
                    fallback,
                }
            })
            .collect()
    }

    /// Cancel every timed-out branch at once, then drain them against one
    /// shared grace deadline. Stragglers are aborted and stay `None`.
    async fn drain(&self, branches: &mut [Branch], timed_out: &[usize], joined: &mut [Joined]) {
        for &index in timed_out {
            METRICS.inc_branch_timeouts();
            branches[index].cancel.cancel();
        }

        let grace_deadline = Instant::now() + self.drain_grace;
        for &index in timed_out {
            let branch = &mut branches[index];
            match tokio::time::timeout_at(grace_deadline, &mut branch.handle).await {
                Ok(output) => {
                    emit_branch_timed_out(index, true);
                    joined[index] = Some(output);
                }
                Err(_) => {
                    emit_branch_timed_out(index, false);
                    branch.handle.abort();
                }
            }
        }
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut branches = self.spawn(cancel);

        let mut timed_out = Vec::new();
        let mut joined: Vec<Joined> = Vec::with_capacity(branches.len());
        for branch in &mut branches {
            let output = match deadline {
                None => Some((&mut branch.handle).await),
                Some(deadline) => {
                    let wait_until = deadline.max(Instant::now() + Duration::from_nanos(1));
                    tokio::time::timeout_at(wait_until, &mut branch.handle)
                        .await
                        .ok()
                }
            };
            if output.is_none() {
                timed_out.push(branch.index);
            }
            joined.push(output);
        }
        if !timed_out.is_empty() {
            self.drain(&mut branches, &timed_out, &mut joined).await;
        }

        let mut failures: Vec<BranchFailure> = Vec::new();
        let mut finished = Vec::with_capacity(branches.len());
        for (branch, output) in branches.into_iter().zip(joined) {
            let was_timed_out = timed_out.contains(&branch.index);
            let operation = match output {
                Some(Ok((operation, result, at))) => {
                    if let Err(error) = result {
                        // a cancelled straggler's unwind is reported as a timeout
                        if !was_timed_out {
                            failures.push(BranchFailure {
                                index: branch.index,
                                error,
                                at,
                            });
                        }
                    }
                    operation
                }
                Some(Err(join_error)) => {
                    failures.push(BranchFailure {
                        index: branch.index,
                        error: OperationError::Panicked(join_error.to_string()),
                        at: Instant::now(),
                    });
                    branch.fallback
                }
                None => branch.fallback,
            };
            self.stats
                .add_indexed_sensor_stats(STATS_TAG, branch.index, operation.stats().clone());
            finished.push(operation);
        }
        self.operations = finished;

        let timeout_message = timeout_message(&timed_out);
        let Some(earliest) = failures.iter().min_by_key(|f| f.at).map(|f| f.index) else {
            return match timeout_message {
                Some(message) => Err(OperationError::assertion(message)),
                None => Ok(()),
            };
        };

        let position = failures
            .iter()
            .position(|f| f.index == earliest)
            .unwrap_or_default();
        let earliest = failures.swap_remove(position);
        if !earliest.error.is_assertion() {
            return Err(earliest.error);
        }

        let mut assertions: Vec<&BranchFailure> = failures
            .iter()
            .filter(|f| f.error.is_assertion())
            .chain(std::iter::once(&earliest))
            .collect();
        assertions.sort_by_key(|f| f.index);
        let mut parts: Vec<String> = assertions
            .iter()
            .map(|f| format!("Operation {} failed: \"{}\"", f.index, f.error))
            .collect();
        parts.extend(timeout_message);
        let message = parts.join(", ");

        self.stats.add_value(ERROR, message.clone());
        Err(OperationError::Assertion(AssertionFailure::with_cause(
            message,
            earliest.error,
        )))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|m| (*m).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "branch panicked".to_string())
}

fn timeout_message(indices: &[usize]) -> Option<String> {
    if indices.is_empty() {
        return None;
    }
    let plural = if indices.len() == 1 { "" } else { "s" };
    let listed: Vec<String> = indices.iter().map(usize::to_string).collect();
    Some(format!("Operation{plural} {} timed out", listed.join(", ")))
}

#[async_trait]
impl SensorOperation for ParallelSensorOperation {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        begin(&mut self.state)?;
        let label = format!("{} branches", self.operations.len());
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

    /// Deep copy of every child. The timeout is not carried over.
    fn clone_operation(&self) -> Box<dyn SensorOperation> {
        let mut clone = ParallelSensorOperation::new();
        for operation in &self.operations {
            clone.add(operation.clone_operation());
        }
        Box::new(clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatValue;

    /// Sleeps, then resolves to a fixed outcome.
    #[derive(Debug, Clone)]
    struct Scripted {
        delay: Duration,
        outcome: Option<OperationError>,
        honour_cancel: bool,
        panics: bool,
        stats: SensorStats,
        state: OperationState,
    }

    impl Scripted {
        fn new(delay_ms: u64, outcome: Option<OperationError>) -> Box<Self> {
            Box::new(Self {
                delay: Duration::from_millis(delay_ms),
                outcome,
                honour_cancel: true,
                panics: false,
                stats: SensorStats::new(),
                state: OperationState::Created,
            })
        }

        fn stubborn(delay_ms: u64) -> Box<Self> {
            let mut op = Self::new(delay_ms, None);
            op.honour_cancel = false;
            op
        }

        fn panicking(delay_ms: u64) -> Box<Self> {
            let mut op = Self::new(delay_ms, None);
            op.panics = true;
            op
        }
    }

    #[async_trait]
    impl SensorOperation for Scripted {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
            begin(&mut self.state)?;
            self.stats.add_value("delay_ms", self.delay.as_millis() as i64);
            let result = if self.honour_cancel {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => self.outcome.clone().map_or(Ok(()), Err),
                    _ = cancel.cancelled() => Err(OperationError::Interrupted),
                }
            } else {
                tokio::time::sleep(self.delay).await;
                self.outcome.clone().map_or(Ok(()), Err)
            };
            if self.panics {
                panic!("sensor driver crashed");
            }
            finish(&mut self.state, &result);
            result
        }

        fn stats(&self) -> &SensorStats {
            &self.stats
        }

        fn state(&self) -> OperationState {
            self.state
        }

        fn clone_operation(&self) -> Box<dyn SensorOperation> {
            let mut clone = self.clone();
            clone.stats = SensorStats::new();
            clone.state = OperationState::Created;
            Box::new(clone)
        }
    }

    #[test]
    fn test_timeout_message_pluralization() {
        assert_eq!(timeout_message(&[]), None);
        assert_eq!(timeout_message(&[2]).as_deref(), Some("Operation 2 timed out"));
        assert_eq!(
            timeout_message(&[0, 3]).as_deref(),
            Some("Operations 0, 3 timed out")
        );
    }

    #[tokio::test]
    async fn test_all_children_pass() {
        let mut parallel = ParallelSensorOperation::new();
        parallel.add(Scripted::new(5, None));
        parallel.add(Scripted::new(1, None));

        parallel.execute(&CancellationToken::new()).await.expect("passes");
        assert_eq!(parallel.state(), OperationState::Completed);
        let child = parallel.stats().sensor_stats("parallel_000").expect("merged");
        assert_eq!(child.value("delay_ms"), Some(&StatValue::Int(5)));
        assert!(parallel.stats().contains_key("parallel_001"));
        assert!(parallel
            .operations()
            .iter()
            .all(|op| op.state() == OperationState::Completed));
    }

    #[tokio::test]
    async fn test_assertions_are_folded_in_index_order() {
        let mut parallel = ParallelSensorOperation::new();
        parallel.add(Scripted::new(30, Some(OperationError::assertion("late"))));
        parallel.add(Scripted::new(1, Some(OperationError::assertion("early"))));
        parallel.add(Scripted::new(1, None));

        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Operation 0 failed: \"late\", Operation 1 failed: \"early\""
        );
        let OperationError::Assertion(failure) = &err else {
            panic!("expected assertion, got {err:?}");
        };
        assert_eq!(
            failure.cause.as_ref().map(|c| c.to_string()).as_deref(),
            Some("early")
        );
        assert_eq!(parallel.stats().error(), Some(err.to_string().as_str()));
        assert_eq!(parallel.state(), OperationState::Completed);
    }

    #[tokio::test]
    async fn test_earliest_runtime_fault_is_unwrapped() {
        let mut parallel = ParallelSensorOperation::new();
        parallel.add(Scripted::new(30, Some(OperationError::assertion("late"))));
        parallel.add(Scripted::new(
            1,
            Some(OperationError::Panicked("source exploded".into())),
        ));

        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OperationError::Panicked(ref m) if m == "source exploded"));
        assert_eq!(parallel.state(), OperationState::Failed);
        assert!(parallel.stats().error().is_none());
        assert!(parallel.stats().contains_key("parallel_000"));
        assert!(parallel.stats().contains_key("parallel_001"));
    }

    #[tokio::test]
    async fn test_later_runtime_fault_is_not_folded() {
        let mut parallel = ParallelSensorOperation::new();
        parallel.add(Scripted::new(1, Some(OperationError::assertion("early"))));
        parallel.add(Scripted::new(30, Some(OperationError::Interrupted)));

        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Operation 0 failed: \"early\"");
    }

    #[tokio::test]
    async fn test_timed_out_branches_are_reported() {
        let mut parallel = ParallelSensorOperation::new().with_timeout(Duration::from_millis(50));
        parallel.add(Scripted::new(10_000, None));
        parallel.add(Scripted::new(1, None));
        parallel.add(Scripted::new(10_000, None));

        let started = std::time::Instant::now();
        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(err.is_assertion());
        assert_eq!(err.to_string(), "Operations 0, 2 timed out");
        for key in ["parallel_000", "parallel_001", "parallel_002"] {
            assert!(parallel.stats().contains_key(key), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_timeout_folds_into_assertion_message() {
        let mut parallel = ParallelSensorOperation::new().with_timeout(Duration::from_millis(50));
        parallel.add(Scripted::new(1, Some(OperationError::assertion("bad mean"))));
        parallel.add(Scripted::new(10_000, None));

        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Operation 0 failed: \"bad mean\", Operation 1 timed out"
        );
    }

    #[tokio::test]
    async fn test_stubborn_branch_is_aborted_after_grace() {
        let mut parallel = ParallelSensorOperation::new()
            .with_timeout(Duration::from_millis(20))
            .with_drain_grace(Duration::from_millis(20));
        parallel.add(Scripted::stubborn(10_000));

        let started = std::time::Instant::now();
        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(err.to_string(), "Operation 0 timed out");
        assert!(parallel.stats().contains_key("parallel_000"));
        // the aborted child is replaced by a fresh copy
        assert_eq!(parallel.operations()[0].state(), OperationState::Created);
    }

    #[tokio::test]
    async fn test_stubborn_branches_share_one_grace_window() {
        let mut parallel = ParallelSensorOperation::new()
            .with_timeout(Duration::from_millis(50))
            .with_drain_grace(Duration::from_millis(200));
        for _ in 0..3 {
            parallel.add(Scripted::stubborn(10_000));
        }

        let started = std::time::Instant::now();
        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(
            elapsed < Duration::from_millis(50 + 200 + 150),
            "join took {elapsed:?}"
        );
        assert_eq!(err.to_string(), "Operations 0, 1, 2 timed out");
        assert!(parallel
            .operations()
            .iter()
            .all(|op| op.state() == OperationState::Created));
    }

    #[tokio::test]
    async fn test_early_panic_beats_later_assertion() {
        let mut parallel = ParallelSensorOperation::new();
        parallel.add(Scripted::new(50, Some(OperationError::assertion("late"))));
        parallel.add(Scripted::panicking(1));

        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert!(
            matches!(err, OperationError::Panicked(ref m) if m == "sensor driver crashed"),
            "got {err:?}"
        );
        assert_eq!(parallel.state(), OperationState::Failed);
        assert!(parallel.stats().contains_key("parallel_001"));
    }

    #[tokio::test]
    async fn test_late_panic_is_not_folded() {
        let mut parallel = ParallelSensorOperation::new();
        parallel.add(Scripted::new(1, Some(OperationError::assertion("early"))));
        parallel.add(Scripted::panicking(40));

        let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Operation 0 failed: \"early\"");
    }

    #[tokio::test]
    async fn test_clone_drops_timeout_and_resets_children() {
        let mut parallel = ParallelSensorOperation::new().with_timeout(Duration::from_secs(5));
        parallel.add(Scripted::new(1, None));
        parallel.execute(&CancellationToken::new()).await.expect("passes");

        let mut clone = parallel.clone_operation();
        assert!(clone.stats().is_empty());
        assert_eq!(clone.state(), OperationState::Created);
        clone.execute(&CancellationToken::new()).await.expect("clone runs");
        assert!(clone.stats().contains_key("parallel_000"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_children() {
        let mut parallel = ParallelSensorOperation::new();
        parallel.add(Scripted::new(10_000, None));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = parallel.execute(&cancel).await.unwrap_err();
        assert!(matches!(err, OperationError::Interrupted));
    }
}

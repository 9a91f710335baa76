//! Plan execution and result reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sensorcheck_core::metrics::METRICS;
use sensorcheck_core::obs::OperationSpan;
use sensorcheck_core::{
    DelaySensorOperation, EventSource, ParallelSensorOperation, RepeatingSensorOperation,
    SensorOperation, SensorStats, SequentialSensorOperation, TestSensorOperation,
    VerificationDefaults,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{OperationConfig, PlanSpec, TestConfig};
use crate::error::{PlanError, Result};

/// Result of one plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub run_id: Uuid,

    pub plan_name: String,

    /// Digest of the executed plan.
    pub plan_digest: String,

    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the whole operation tree passed.
    pub passed: bool,

    /// Aggregated failure message of the root operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Statistics tree of the root operation.
    pub stats: SensorStats,
}

/// Builds operation trees from plans and executes them.
#[derive(Debug, Clone, Default)]
pub struct PlanRunner {
    cancel: CancellationToken,
}

impl PlanRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run under an external cancellation token (e.g. Ctrl-C).
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Build the operation tree without executing it.
    pub fn validate(&self, plan: &PlanSpec) -> Result<Box<dyn SensorOperation>> {
        let _span = OperationSpan::enter("plan", &plan.name);
        if plan.name.trim().is_empty() {
            return Err(PlanError::Invalid("plan name must not be empty".to_string()));
        }
        let builder = TreeBuilder {
            source: plan.source.build(),
            defaults: plan.defaults_table(),
        };
        builder.build(&plan.operation, "operation")
    }

    /// Execute the plan once.
    ///
    /// Failures of the operation tree are reported in the [`PlanResult`];
    /// only an invalid plan is an `Err`.
    pub async fn run(&self, plan: &PlanSpec) -> Result<PlanResult> {
        let plan_digest = plan.plan_digest()?;
        let mut root = self.validate(plan)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(run_id = %run_id, plan = %plan.name, digest = %&plan_digest[..12], "Starting plan");

        let outcome = root.execute(&self.cancel).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let error = match outcome {
            Ok(()) => None,
            Err(err) => {
                if !err.is_assertion() {
                    warn!(run_id = %run_id, error = %err, "Plan aborted by a runtime fault");
                }
                Some(err.to_string())
            }
        };
        let passed = error.is_none();
        info!(run_id = %run_id, passed, duration_ms, "Plan finished");
        METRICS.flush();

        Ok(PlanResult {
            run_id,
            plan_name: plan.name.clone(),
            plan_digest,
            started_at,
            duration_ms,
            passed,
            error,
            stats: root.stats().clone(),
        })
    }
}

struct TreeBuilder {
    source: Arc<dyn EventSource>,
    defaults: VerificationDefaults,
}

impl TreeBuilder {
    fn build(&self, config: &OperationConfig, path: &str) -> Result<Box<dyn SensorOperation>> {
        Ok(match config {
            OperationConfig::Test(test) => Box::new(self.build_test(test, path)?),
            OperationConfig::Sequential { operations } => {
                let mut op = SequentialSensorOperation::new();
                for (i, child) in operations.iter().enumerate() {
                    op.add(self.build(child, &format!("{path}.operations[{i}]"))?);
                }
                Box::new(op)
            }
            OperationConfig::Parallel {
                operations,
                timeout_ms,
            } => {
                let mut op = ParallelSensorOperation::new();
                if let Some(ms) = timeout_ms {
                    op = op.with_timeout(Duration::from_millis(*ms));
                }
                for (i, child) in operations.iter().enumerate() {
                    op.add(self.build(child, &format!("{path}.operations[{i}]"))?);
                }
                Box::new(op)
            }
            OperationConfig::Repeating {
                operation,
                iterations,
            } => Box::new(RepeatingSensorOperation::new(
                self.build(operation, &format!("{path}.operation"))?,
                *iterations,
            )),
            OperationConfig::Delay {
                operation,
                delay_ms,
            } => Box::new(DelaySensorOperation::new(
                self.build(operation, &format!("{path}.operation"))?,
                Duration::from_millis(*delay_ms),
            )),
        })
    }

    fn build_test(&self, config: &TestConfig, path: &str) -> Result<TestSensorOperation> {
        if config.sensor.name.is_empty() {
            return Err(PlanError::Invalid(format!("{path}: sensor name must not be empty")));
        }
        let env = config.environment(self.source.clone());
        let mut op = TestSensorOperation::new(env, config.capture.clone())
            .with_timeouts(config.timeouts)
            .with_event_logging(config.log_events);
        for verification in &config.verifications {
            let unit = verification.build(op.environment())?;
            if !op.add_boxed_verification(Some(unit)) {
                warn!(path, ?verification, "Duplicate verification ignored");
            }
        }
        if config.use_defaults {
            op.add_default_verifications(&self.defaults)?;
        }
        Ok(op)
    }
}

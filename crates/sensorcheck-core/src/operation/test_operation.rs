//! Single capture-and-verify pass against one sensor.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::environment::TestSensorEnvironment;
use crate::error::{ConfigError, OperationError, Result};
use crate::event::SensorEvent;
use crate::listener::{CaptureTimeouts, TestSensorEventListener, WaitOutcome};
use crate::metrics::METRICS;
use crate::obs::{
    emit_capture_timeout, emit_operation_finished, emit_operation_started, emit_verification_failed,
    operation_span,
};
use crate::source::SensorRegistration;
use crate::stats::{SensorStats, ERROR, EVENT_COUNT_KEY, SENSOR_HANDLE_KEY, SENSOR_NAME_KEY};
use crate::verification::{SensorVerification, VerificationDefaults, VerificationSet};

use super::{begin, finish, CaptureStrategy, OperationState, SensorOperation};

const KIND: &str = "test";

/// Registers a listener, captures events per its [`CaptureStrategy`], then
/// runs every registered verification against the full capture.
///
/// All verification failures (plus a capture shortfall, if any) are joined
/// into one assertion failure, which is also recorded under `error`.
#[derive(Debug)]
pub struct TestSensorOperation {
    env: TestSensorEnvironment,
    strategy: CaptureStrategy,
    timeouts: CaptureTimeouts,
    log_events: bool,
    verifications: VerificationSet,
    events: Vec<SensorEvent>,
    stats: SensorStats,
    state: OperationState,
}

impl TestSensorOperation {
    pub fn new(env: TestSensorEnvironment, strategy: CaptureStrategy) -> Self {
        Self {
            env,
            strategy,
            timeouts: CaptureTimeouts::default(),
            log_events: false,
            verifications: VerificationSet::new(),
            events: Vec::new(),
            stats: SensorStats::new(),
            state: OperationState::Created,
        }
    }

    /// Capture until `event_count` events arrived.
    pub fn by_count(env: TestSensorEnvironment, event_count: usize) -> Self {
        Self::new(env, CaptureStrategy::ByCount { event_count })
    }

    /// Capture for `duration`.
    pub fn by_duration(env: TestSensorEnvironment, duration: Duration) -> Self {
        Self::new(
            env,
            CaptureStrategy::ByDuration {
                duration_ms: duration_ms(duration),
            },
        )
    }

    /// Capture for `duration`, then flush the source and wait for the acknowledgement.
    pub fn by_duration_then_flush(env: TestSensorEnvironment, duration: Duration) -> Self {
        Self::new(
            env,
            CaptureStrategy::ByDurationThenFlush {
                duration_ms: duration_ms(duration),
            },
        )
    }

    pub fn with_timeouts(mut self, timeouts: CaptureTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Trace every captured event.
    pub fn with_event_logging(mut self, log_events: bool) -> Self {
        self.log_events = log_events;
        self
    }

    /// Register a verification; a second unit for the same concern is ignored.
    pub fn add_verification<V: SensorVerification + 'static>(&mut self, verification: V) -> bool {
        self.verifications.add(Box::new(verification))
    }

    /// Register an optional verification; `None` is silently ignored.
    pub fn add_boxed_verification(&mut self, verification: Option<Box<dyn SensorVerification>>) -> bool {
        match verification {
            Some(v) => self.verifications.add(v),
            None => false,
        }
    }

    /// Register the defaults `table` lists for this sensor. Returns how many were added.
    pub fn add_default_verifications(&mut self, table: &VerificationDefaults) -> std::result::Result<usize, ConfigError> {
        let units = table.build(&self.env)?;
        Ok(units
            .into_iter()
            .map(|unit| self.verifications.add(unit))
            .filter(|added| *added)
            .count())
    }

    pub fn environment(&self) -> &TestSensorEnvironment {
        &self.env
    }

    pub fn strategy(&self) -> &CaptureStrategy {
        &self.strategy
    }

    pub fn verifications(&self) -> &VerificationSet {
        &self.verifications
    }

    /// Events captured by the last run, in arrival order.
    pub fn events(&self) -> &[SensorEvent] {
        &self.events
    }

    async fn capture(
        &self,
        listener: &TestSensorEventListener,
        registration: &SensorRegistration,
        cancel: &CancellationToken,
        shortfalls: &mut Vec<String>,
    ) -> Result<WaitOutcome> {
        match &self.strategy {
            CaptureStrategy::ByCount { event_count } => {
                let timeout = self.timeouts.event_timeout(
                    *event_count,
                    self.env.capture_period_us(),
                    self.env.max_report_latency_us(),
                );
                let outcome = listener.wait_for_events(*event_count, timeout, cancel).await;
                if outcome == WaitOutcome::TimedOut {
                    let received = listener.event_count();
                    emit_capture_timeout(&self.env.sensor().name, *event_count, received);
                    shortfalls.push(format!(
                        "Not enough events: requested {event_count}, received {received}"
                    ));
                }
                Ok(outcome)
            }
            CaptureStrategy::ByDuration { duration_ms } => Ok(listener
                .wait_for_duration(Duration::from_millis(*duration_ms), cancel)
                .await),
            CaptureStrategy::ByDurationThenFlush { duration_ms } => {
                let outcome = listener
                    .wait_for_duration(Duration::from_millis(*duration_ms), cancel)
                    .await;
                if outcome == WaitOutcome::Interrupted {
                    return Ok(outcome);
                }
                let outcome = listener
                    .flush_and_wait(registration, self.timeouts.flush_timeout(), cancel)
                    .await?;
                if outcome == WaitOutcome::TimedOut {
                    shortfalls.push(format!(
                        "Flush not acknowledged within {}ms",
                        self.timeouts.flush_ms
                    ));
                }
                Ok(outcome)
            }
        }
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        let sensor = self.env.sensor().clone();
        self.stats.add_value(SENSOR_NAME_KEY, sensor.name.clone());
        self.stats.add_value(SENSOR_HANDLE_KEY, sensor.handle);

        let listener = TestSensorEventListener::with_logging(sensor.clone(), self.log_events);
        let mut messages = Vec::new();
        let outcome = {
            let registration = SensorRegistration::register(
                self.env.source().clone(),
                &sensor,
                self.env.registration_request(),
                listener.sink(),
            )?;
            self.capture(&listener, &registration, cancel, &mut messages).await?
        };

        self.events = listener.events();
        METRICS.add_events_captured(self.events.len() as u64);
        self.stats.add_value(EVENT_COUNT_KEY, self.events.len());

        let failures = tracing::debug_span!("verify").in_scope(|| {
            self.verifications
                .verify_all(&self.env, &self.events, &mut self.stats)
        });
        for failure in failures {
            METRICS.inc_verification_failures();
            emit_verification_failed(&sensor.name, failure.verification, &failure.message);
            messages.push(failure.message);
        }
        self.stats.log_stats(KIND);

        if outcome == WaitOutcome::Interrupted {
            return Err(OperationError::Interrupted);
        }
        if messages.is_empty() {
            return Ok(());
        }

        let message = self
            .env
            .format_assertion_message("TestSensorOperation", &messages.join(", "));
        self.stats.add_value(ERROR, message.clone());
        Err(OperationError::assertion(message))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl SensorOperation for TestSensorOperation {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        begin(&mut self.state)?;
        let label = self.env.sensor().name.clone();
        let started = Instant::now();
        METRICS.inc_operations();
        emit_operation_started(KIND, &label);

        let result = self.run(cancel).instrument(operation_span(KIND, &label)).await;

        finish(&mut self.state, &result);
        emit_operation_finished(KIND, &label, duration_ms(started.elapsed()), result.is_ok());
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
            env: self.env.clone(),
            strategy: self.strategy.clone(),
            timeouts: self.timeouts,
            log_events: self.log_events,
            verifications: self.verifications.clone(),
            events: Vec::new(),
            stats: SensorStats::new(),
            state: OperationState::Created,
        })
    }
}

//! Capture adapter between an event source and an operation.
//!
//! [`TestSensorEventListener`] buffers every delivered event in arrival order
//! and offers three blocking waits (event count, fixed duration, flush
//! acknowledgement). Every wait is bounded by a timeout and by a
//! cancellation token, and none of them fails: a timeout is reported as
//! [`WaitOutcome::TimedOut`] and left to the caller to judge.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::clock::elapsed_realtime_nanos;
use crate::error::SourceError;
use crate::event::{RawSensorEvent, SensorDescriptor, SensorEvent};
use crate::source::{SensorEventSink, SensorRegistration};

/// How a blocking wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Interrupted,
}

/// Wait bounds used while capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureTimeouts {
    /// Slack added to the computed event-count wait.
    pub event_slack_ms: u64,
    /// Bound on waiting for a flush acknowledgement.
    pub flush_ms: u64,
}

impl Default for CaptureTimeouts {
    fn default() -> Self {
        Self {
            event_slack_ms: 5_000,
            flush_ms: 5_000,
        }
    }
}

impl CaptureTimeouts {
    /// Bound on waiting for `count` events:
    /// `2 * count * period + max_report_latency + slack`.
    pub fn event_timeout(&self, count: usize, period_us: u32, max_report_latency_us: u32) -> Duration {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        let expected_us = count
            .saturating_mul(2)
            .saturating_mul(u64::from(period_us))
            .saturating_add(u64::from(max_report_latency_us));
        Duration::from_micros(expected_us) + Duration::from_millis(self.event_slack_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_ms)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ListenerShared {
    sensor: Arc<SensorDescriptor>,
    events: Mutex<Vec<SensorEvent>>,
    event_notify: Notify,
    flush_acks: watch::Sender<u64>,
    log_events: bool,
}

impl SensorEventSink for ListenerShared {
    fn on_sensor_changed(&self, event: RawSensorEvent) {
        let received = elapsed_realtime_nanos();
        if self.log_events {
            trace!(
                sensor = %self.sensor.name,
                sensor_timestamp = event.timestamp_ns,
                received_timestamp = received,
                values = ?event.values,
                "sensor event"
            );
        }
        lock(&self.events).push(SensorEvent::from_raw(self.sensor.clone(), event, received));
        self.event_notify.notify_waiters();
    }

    fn on_flush_completed(&self) {
        self.flush_acks.send_modify(|acks| *acks += 1);
        trace!(sensor = %self.sensor.name, "flush completed");
    }
}

/// Thread-safe, ordered event buffer fed by an event source.
#[derive(Clone)]
pub struct TestSensorEventListener {
    shared: Arc<ListenerShared>,
}

impl std::fmt::Debug for TestSensorEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSensorEventListener")
            .field("sensor", &self.shared.sensor.name)
            .field("events", &self.event_count())
            .finish()
    }
}

impl TestSensorEventListener {
    pub fn new(sensor: Arc<SensorDescriptor>) -> Self {
        Self::with_logging(sensor, false)
    }

    /// Create a listener that traces every received event.
    pub fn with_logging(sensor: Arc<SensorDescriptor>, log_events: bool) -> Self {
        let (flush_acks, _) = watch::channel(0);
        Self {
            shared: Arc::new(ListenerShared {
                sensor,
                events: Mutex::new(Vec::new()),
                event_notify: Notify::new(),
                flush_acks,
                log_events,
            }),
        }
    }

    /// The sink to hand to [`crate::source::EventSource::register`].
    pub fn sink(&self) -> Arc<dyn SensorEventSink> {
        self.shared.clone()
    }

    /// Snapshot of captured events in arrival order.
    pub fn events(&self) -> Vec<SensorEvent> {
        lock(&self.shared.events).clone()
    }

    pub fn event_count(&self) -> usize {
        lock(&self.shared.events).len()
    }

    /// Number of flush acknowledgements received so far.
    pub fn flush_acks(&self) -> u64 {
        *self.shared.flush_acks.borrow()
    }

    /// Block until at least `count` events have been captured.
    pub async fn wait_for_events(
        &self,
        count: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.event_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.event_count() >= count {
                return WaitOutcome::Completed;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return if self.event_count() >= count {
                        WaitOutcome::Completed
                    } else {
                        WaitOutcome::TimedOut
                    };
                }
                _ = cancel.cancelled() => return WaitOutcome::Interrupted,
            }
        }
    }

    /// Keep capturing for `duration`.
    pub async fn wait_for_duration(&self, duration: Duration, cancel: &CancellationToken) -> WaitOutcome {
        tokio::select! {
            _ = tokio::time::sleep(duration) => WaitOutcome::Completed,
            _ = cancel.cancelled() => WaitOutcome::Interrupted,
        }
    }

    /// Block until more than `baseline` flush acknowledgements have arrived.
    pub async fn wait_for_flush_complete(
        &self,
        baseline: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let mut acks = self.shared.flush_acks.subscribe();
        let acknowledged = async move { acks.wait_for(|n| *n > baseline).await.is_ok() };
        tokio::select! {
            ok = acknowledged => if ok { WaitOutcome::Completed } else { WaitOutcome::TimedOut },
            _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            _ = cancel.cancelled() => WaitOutcome::Interrupted,
        }
    }

    /// Request a flush on `registration` and wait for its acknowledgement.
    pub async fn flush_and_wait(
        &self,
        registration: &SensorRegistration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, SourceError> {
        let baseline = self.flush_acks();
        registration.flush()?;
        Ok(self.wait_for_flush_complete(baseline, timeout, cancel).await)
    }
}

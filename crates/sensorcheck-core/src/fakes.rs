//! In-memory event sources.
//!
//! - [`ScriptedSource`] replays a fixed event script on registration.
//! - [`SyntheticSource`] runs a periodic generator task per registration,
//!   producing deterministic multi-channel signals and honouring batching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::clock::elapsed_realtime_nanos;
use crate::error::SourceError;
use crate::event::{RawSensorEvent, SensorDescriptor};
use crate::source::{EventSource, RegistrationId, RegistrationRequest, SensorEventSink};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Replays a fixed script of events to every registration.
///
/// Without an interval the whole script is delivered synchronously inside
/// `register`. With an interval a task delivers one event per tick until the
/// script is exhausted or the registration is dropped.
#[derive(Debug)]
pub struct ScriptedSource {
    script: Vec<RawSensorEvent>,
    interval: Option<Duration>,
    acknowledge_flush: bool,
    refuse: Option<String>,
    next_id: AtomicU64,
    registrations: Mutex<HashMap<u64, CancellationToken>>,
    sinks: Mutex<HashMap<u64, Arc<dyn SensorEventSink>>>,
    flush_requests: AtomicU64,
}

impl ScriptedSource {
    pub fn new(script: Vec<RawSensorEvent>) -> Self {
        Self {
            script,
            interval: None,
            acknowledge_flush: true,
            refuse: None,
            next_id: AtomicU64::new(1),
            registrations: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
            flush_requests: AtomicU64::new(0),
        }
    }

    /// Build a script from channel values with evenly spaced timestamps.
    pub fn from_values(period_ns: i64, values: Vec<Vec<f32>>) -> Self {
        let script = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| RawSensorEvent::new(i as i64 * period_ns, v))
            .collect();
        Self::new(script)
    }

    /// A source that accepts registrations but never delivers nor acknowledges flushes.
    pub fn stalled() -> Self {
        Self::new(Vec::new()).without_flush_ack()
    }

    /// Deliver one scripted event per `interval` from a background task.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Never acknowledge flush requests.
    pub fn without_flush_ack(mut self) -> Self {
        self.acknowledge_flush = false;
        self
    }

    /// Refuse every registration with `reason`.
    pub fn refusing(mut self, reason: impl Into<String>) -> Self {
        self.refuse = Some(reason.into());
        self
    }

    pub fn active_registrations(&self) -> usize {
        lock(&self.registrations).len()
    }

    pub fn flush_requests(&self) -> u64 {
        self.flush_requests.load(Ordering::Relaxed)
    }
}

impl EventSource for ScriptedSource {
    fn register(
        &self,
        sensor: &SensorDescriptor,
        _request: RegistrationRequest,
        sink: Arc<dyn SensorEventSink>,
    ) -> Result<RegistrationId, SourceError> {
        if let Some(reason) = &self.refuse {
            return Err(SourceError::RegistrationRefused {
                sensor: sensor.name.clone(),
                reason: reason.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        lock(&self.registrations).insert(id, stop.clone());
        lock(&self.sinks).insert(id, sink.clone());

        match (self.interval, tokio::runtime::Handle::try_current()) {
            (Some(interval), Ok(handle)) => {
                let script = self.script.clone();
                handle.spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    for event in script {
                        tokio::select! {
                            _ = ticker.tick() => sink.on_sensor_changed(event),
                            _ = stop.cancelled() => return,
                        }
                    }
                });
            }
            _ => {
                for event in &self.script {
                    sink.on_sensor_changed(event.clone());
                }
            }
        }

        Ok(RegistrationId(id))
    }

    fn unregister(&self, id: RegistrationId) {
        if let Some(stop) = lock(&self.registrations).remove(&id.0) {
            stop.cancel();
        }
        lock(&self.sinks).remove(&id.0);
    }

    fn flush(&self, id: RegistrationId) -> Result<(), SourceError> {
        self.flush_requests.fetch_add(1, Ordering::Relaxed);
        let sink = lock(&self.sinks)
            .get(&id.0)
            .cloned()
            .ok_or(SourceError::UnknownRegistration(id.0))?;
        if self.acknowledge_flush {
            sink.on_flush_completed();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SyntheticSource
// ---------------------------------------------------------------------------

/// Deterministic per-channel signal: `base[c] + noise * sin(0.7 * i + c)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSignal {
    /// Centre value of each channel.
    pub base: Vec<f32>,
    /// Peak deviation around the centre.
    #[serde(default)]
    pub noise: f32,
}

impl SyntheticSignal {
    pub fn constant(base: Vec<f32>) -> Self {
        Self { base, noise: 0.0 }
    }

    pub fn sample(&self, index: u64) -> Vec<f32> {
        self.base
            .iter()
            .enumerate()
            .map(|(c, b)| {
                let phase = 0.7 * index as f64 + c as f64;
                b + self.noise * phase.sin() as f32
            })
            .collect()
    }
}

impl Default for SyntheticSignal {
    fn default() -> Self {
        Self::constant(vec![0.0, 0.0, 0.0])
    }
}

struct SyntheticRegistration {
    sink: Arc<dyn SensorEventSink>,
    pending: Arc<Mutex<Vec<RawSensorEvent>>>,
    stop: CancellationToken,
}

/// Periodic generator of synthetic sensor events.
///
/// Each registration gets a task ticking at the requested sampling period.
/// With a non-zero report latency events are buffered and delivered in
/// batches, or drained early by `flush`.
#[derive(Default)]
pub struct SyntheticSource {
    signals: HashMap<String, SyntheticSignal>,
    next_id: AtomicU64,
    registrations: Mutex<HashMap<u64, SyntheticRegistration>>,
}

impl std::fmt::Debug for SyntheticSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticSource")
            .field("signals", &self.signals)
            .field("active", &self.active_registrations())
            .finish()
    }
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `signal` for the sensor named `sensor_name`.
    pub fn with_signal(mut self, sensor_name: impl Into<String>, signal: SyntheticSignal) -> Self {
        self.signals.insert(sensor_name.into(), signal);
        self
    }

    pub fn active_registrations(&self) -> usize {
        lock(&self.registrations).len()
    }
}

impl EventSource for SyntheticSource {
    fn register(
        &self,
        sensor: &SensorDescriptor,
        request: RegistrationRequest,
        sink: Arc<dyn SensorEventSink>,
    ) -> Result<RegistrationId, SourceError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            SourceError::RegistrationRefused {
                sensor: sensor.name.clone(),
                reason: "no async runtime available".to_string(),
            }
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let signal = self.signals.get(&sensor.name).cloned().unwrap_or_default();
        let period = Duration::from_micros(u64::from(request.sampling_period_us.max(1)));
        let latency_ns = i64::from(request.max_report_latency_us) * 1_000;
        let pending = Arc::new(Mutex::new(Vec::new()));
        let stop = CancellationToken::new();

        let task_sink = sink.clone();
        let task_pending = pending.clone();
        let task_stop = stop.clone();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut index = 0u64;
            let mut last_batch_ns = elapsed_realtime_nanos();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = task_stop.cancelled() => break,
                }
                let now = elapsed_realtime_nanos();
                let event = RawSensorEvent::new(now, signal.sample(index));
                index += 1;
                if latency_ns == 0 {
                    task_sink.on_sensor_changed(event);
                    continue;
                }
                let batch = {
                    let mut pending = lock(&task_pending);
                    pending.push(event);
                    if now - last_batch_ns >= latency_ns {
                        last_batch_ns = now;
                        std::mem::take(&mut *pending)
                    } else {
                        Vec::new()
                    }
                };
                for event in batch {
                    task_sink.on_sensor_changed(event);
                }
            }
        });

        lock(&self.registrations).insert(
            id,
            SyntheticRegistration {
                sink,
                pending,
                stop,
            },
        );
        tracing::trace!(sensor = %sensor.name, id, ?period, "synthetic generator started");
        Ok(RegistrationId(id))
    }

    fn unregister(&self, id: RegistrationId) {
        if let Some(reg) = lock(&self.registrations).remove(&id.0) {
            reg.stop.cancel();
        }
    }

    fn flush(&self, id: RegistrationId) -> Result<(), SourceError> {
        let (sink, drained) = {
            let registrations = lock(&self.registrations);
            let reg = registrations
                .get(&id.0)
                .ok_or(SourceError::UnknownRegistration(id.0))?;
            let drained = std::mem::take(&mut *lock(&reg.pending));
            (reg.sink.clone(), drained)
        };
        for event in drained {
            sink.on_sensor_changed(event);
        }
        sink.on_flush_completed();
        Ok(())
    }
}

//! Event source seam.
//!
//! The engine never talks to a concrete sensor API. Anything that can
//! register a listener at a sampling period, deliver timestamped
//! multi-channel samples asynchronously and acknowledge a flush satisfies
//! [`EventSource`]. In-memory implementations live in [`crate::fakes`].

use std::fmt;
use std::sync::Arc;

use crate::error::SourceError;
use crate::event::{RawSensorEvent, SensorDescriptor};

/// Identifier of one live registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiver of asynchronously delivered events.
///
/// Called from whatever thread or task the source delivers on.
pub trait SensorEventSink: Send + Sync {
    fn on_sensor_changed(&self, event: RawSensorEvent);

    fn on_flush_completed(&self);
}

impl fmt::Debug for dyn SensorEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SensorEventSink")
    }
}

/// Parameters of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub sampling_period_us: u32,
    pub max_report_latency_us: u32,
}

/// External producer of sensor events.
pub trait EventSource: Send + Sync + fmt::Debug {
    /// Subscribe `sink` to events of `sensor`.
    fn register(
        &self,
        sensor: &SensorDescriptor,
        request: RegistrationRequest,
        sink: Arc<dyn SensorEventSink>,
    ) -> Result<RegistrationId, SourceError>;

    /// Stop delivery for `id`. Unknown ids are ignored.
    fn unregister(&self, id: RegistrationId);

    /// Drain any batched events for `id`, then call `on_flush_completed`.
    fn flush(&self, id: RegistrationId) -> Result<(), SourceError>;
}

/// Scoped registration: unregisters from the source when dropped.
///
/// Dropping covers every exit path, including task cancellation.
pub struct SensorRegistration {
    source: Arc<dyn EventSource>,
    id: RegistrationId,
}

impl SensorRegistration {
    pub fn register(
        source: Arc<dyn EventSource>,
        sensor: &SensorDescriptor,
        request: RegistrationRequest,
        sink: Arc<dyn SensorEventSink>,
    ) -> Result<Self, SourceError> {
        let id = source.register(sensor, request, sink)?;
        tracing::debug!(sensor = %sensor.name, registration = %id, "registered listener");
        Ok(Self { source, id })
    }

    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Ask the source to drain batched events.
    pub fn flush(&self) -> Result<(), SourceError> {
        self.source.flush(self.id)
    }
}

impl Drop for SensorRegistration {
    fn drop(&mut self) {
        self.source.unregister(self.id);
        tracing::debug!(registration = %self.id, "unregistered listener");
    }
}

impl fmt::Debug for SensorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorRegistration")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

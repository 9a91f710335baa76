//! sensorcheck core library
//!
//! Composable sensor test operations: capture timestamped events from an
//! [`EventSource`], run pluggable verifications against them and collect a
//! hierarchical [`SensorStats`] record.

pub mod clock;
pub mod environment;
pub mod error;
pub mod event;
pub mod fakes;
pub mod helpers;
pub mod listener;
pub mod metrics;
pub mod obs;
pub mod operation;
pub mod source;
pub mod stats;
pub mod telemetry;
pub mod verification;

pub use environment::{SamplingRate, TestSensorEnvironment};
pub use error::{
    AssertionFailure, ConfigError, OperationError, Result, SourceError, VerificationFailure,
};
pub use event::{RawSensorEvent, ReportingMode, SensorDescriptor, SensorEvent, SensorType};
pub use fakes::{ScriptedSource, SyntheticSignal, SyntheticSource};
pub use listener::{CaptureTimeouts, TestSensorEventListener, WaitOutcome};
pub use operation::{
    CaptureStrategy, DelaySensorOperation, OperationState, ParallelSensorOperation,
    RepeatingSensorOperation, SensorOperation, SequentialSensorOperation, TestSensorOperation,
};
pub use source::{
    EventSource, RegistrationId, RegistrationRequest, SensorEventSink, SensorRegistration,
};
pub use stats::{SensorStats, StatEntry, StatValue};
pub use verification::{SensorVerification, VerificationDefaults, VerificationSet};

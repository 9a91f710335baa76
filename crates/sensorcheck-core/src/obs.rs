//! Structured observability hooks for operation lifecycle events.
//!
//! - [`operation_span`] builds the span an operation's `execute` future is
//!   instrumented with; [`OperationSpan`] enters one for synchronous work.
//! - `emit_*` functions log key lifecycle events with stable `event` names.

use tracing::{info, warn};

/// Span tagged with the operation kind and label.
pub fn operation_span(kind: &'static str, label: &str) -> tracing::Span {
    tracing::info_span!("sensorcheck.operation", kind = kind, label = %label)
}

/// RAII guard that enters an operation span until dropped.
///
/// Only for synchronous sections; async code uses
/// `tracing::Instrument` with [`operation_span`].
pub struct OperationSpan {
    _span: tracing::span::EnteredSpan,
}

impl OperationSpan {
    pub fn enter(kind: &'static str, label: &str) -> Self {
        Self {
            _span: operation_span(kind, label).entered(),
        }
    }
}

pub fn emit_operation_started(kind: &'static str, label: &str) {
    info!(event = "operation.started", kind = kind, label = %label);
}

/// Emit event: operation finished with duration and outcome.
pub fn emit_operation_finished(kind: &'static str, label: &str, duration_ms: u64, success: bool) {
    info!(
        event = "operation.finished",
        kind = kind,
        label = %label,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_verification_failed(label: &str, verification: &str, message: &str) {
    info!(
        event = "verification.failed",
        label = %label,
        verification = %verification,
        message = %message,
    );
}

/// Emit event: a parallel branch missed its join deadline (warning level).
pub fn emit_branch_timed_out(index: usize, drained: bool) {
    warn!(event = "parallel.branch_timed_out", index = index, drained = drained);
}

/// Emit event: fewer events than requested arrived in time (warning level).
pub fn emit_capture_timeout(label: &str, requested: usize, received: usize) {
    warn!(
        event = "capture.timeout",
        label = %label,
        requested = requested,
        received = received,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_span_enter() {
        let _span = OperationSpan::enter("test", "accel");
        emit_operation_started("test", "accel");
        emit_operation_finished("test", "accel", 12, true);
    }
}

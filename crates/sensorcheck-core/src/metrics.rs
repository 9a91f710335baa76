//! Global atomic counters for sensorcheck runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event (e.g. at the end of a plan run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free relaxed counters.
pub struct Metrics {
    operations_executed: AtomicU64,
    verification_failures: AtomicU64,
    branch_timeouts: AtomicU64,
    events_captured: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            operations_executed: AtomicU64::new(0),
            verification_failures: AtomicU64::new(0),
            branch_timeouts: AtomicU64::new(0),
            events_captured: AtomicU64::new(0),
        }
    }

    pub fn inc_operations(&self) {
        self.operations_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "operations_executed", "counter incremented");
    }

    pub fn inc_verification_failures(&self) {
        self.verification_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "verification_failures", "counter incremented");
    }

    pub fn inc_branch_timeouts(&self) {
        self.branch_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "branch_timeouts", "counter incremented");
    }

    /// Add `count` captured events.
    pub fn add_events_captured(&self, count: u64) {
        self.events_captured.fetch_add(count, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            operations_executed = self.operations_executed(),
            verification_failures = self.verification_failures(),
            branch_timeouts = self.branch_timeouts(),
            events_captured = self.events_captured(),
        );
    }

    pub fn operations_executed(&self) -> u64 {
        self.operations_executed.load(Ordering::Relaxed)
    }

    pub fn verification_failures(&self) -> u64 {
        self.verification_failures.load(Ordering::Relaxed)
    }

    pub fn branch_timeouts(&self) -> u64 {
        self.branch_timeouts.load(Ordering::Relaxed)
    }

    pub fn events_captured(&self) -> u64 {
        self.events_captured.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.operations_executed.store(0, Ordering::Relaxed);
        self.verification_failures.store(0, Ordering::Relaxed);
        self.branch_timeouts.store(0, Ordering::Relaxed);
        self.events_captured.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_operations();
        m.inc_operations();
        assert_eq!(m.operations_executed(), 2);

        m.inc_verification_failures();
        assert_eq!(m.verification_failures(), 1);

        m.inc_branch_timeouts();
        assert_eq!(m.branch_timeouts(), 1);

        m.add_events_captured(40);
        m.add_events_captured(2);
        assert_eq!(m.events_captured(), 42);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_operations();
        m.inc_verification_failures();
        m.inc_branch_timeouts();
        m.add_events_captured(7);
        m.reset();
        assert_eq!(m.operations_executed(), 0);
        assert_eq!(m.verification_failures(), 0);
        assert_eq!(m.branch_timeouts(), 0);
        assert_eq!(m.events_captured(), 0);
    }
}

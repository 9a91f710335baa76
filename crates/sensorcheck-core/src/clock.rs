//! Process-wide monotonic clock shared by event sources and listeners.

use std::sync::OnceLock;
use std::time::Instant;

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call in this process.
///
/// Sources stamp events and the capture adapter stamps receipts against the
/// same origin, so the two timestamps are directly comparable.
pub fn elapsed_realtime_nanos() -> i64 {
    let boot = BOOT.get_or_init(Instant::now);
    i64::try_from(boot.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic milliseconds since process start.
///
/// Every suspension-free component (buckets, AIMD, the scheduler) takes its
/// `now_ms` as an explicit argument rather than reading the clock itself, so
/// tests can drive time deterministically; this function is what production
/// call sites pass in.
pub fn now_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

//! Per-adapter circuit breaker, grounded directly in
//! `jizhuozhi-hermes/gateway/src/upstream/circuit_breaker.rs`'s
//! `NodeBreaker`/`CircuitBreakerRegistry`, generalized from "node" to
//! "adapter" keying since this router fronts model adapters rather than
//! proxy upstream nodes.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerCheck {
    Allowed,
    Probe,
    Rejected,
}

/// Per spec.md §4.7: `half_open` admits a single probe; success returns to
/// `closed`, failure returns to `open` with the cooldown doubled (capped),
/// so a downstream that keeps failing its probes backs off exponentially
/// instead of being re-probed every `base_cooldown`.
struct AdapterBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    total_requests: AtomicU32,
    total_failures: AtomicU32,
    opened_at: parking_lot::Mutex<Option<Instant>>,
    fail_ratio: f64,
    min_requests: u32,
    base_cooldown: std::time::Duration,
    current_cooldown_ms: AtomicU64,
    max_cooldown_ms: u64,
}

impl AdapterBreaker {
    fn new(fail_ratio: f64, min_requests: u32, cooldown: std::time::Duration) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            total_requests: AtomicU32::new(0),
            total_failures: AtomicU32::new(0),
            opened_at: parking_lot::Mutex::new(None),
            fail_ratio,
            min_requests,
            base_cooldown: cooldown,
            current_cooldown_ms: AtomicU64::new(cooldown.as_millis() as u64),
            max_cooldown_ms: (cooldown.as_millis() as u64).saturating_mul(32).max(1),
        }
    }

    fn check(&self) -> BreakerCheck {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => BreakerCheck::Allowed,
            STATE_OPEN => {
                let cooldown = std::time::Duration::from_millis(self.current_cooldown_ms.load(Ordering::Relaxed));
                let ready = {
                    let opened_at = self.opened_at.lock();
                    opened_at.map(|t| t.elapsed() >= cooldown).unwrap_or(true)
                };
                if ready
                    && self
                        .state
                        .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    BreakerCheck::Probe
                } else {
                    BreakerCheck::Rejected
                }
            }
            _ => BreakerCheck::Rejected,
        }
    }

    fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self
            .state
            .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.total_requests.store(0, Ordering::Relaxed);
            self.total_failures.store(0, Ordering::Relaxed);
            self.current_cooldown_ms
                .store(self.base_cooldown.as_millis() as u64, Ordering::Relaxed);
        }
    }

    fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);

        if self.state.load(Ordering::Acquire) == STATE_HALF_OPEN {
            self.current_cooldown_ms
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                    Some((c.saturating_mul(2)).min(self.max_cooldown_ms))
                })
                .ok();
            self.trip();
            return;
        }

        let total = self.total_requests.load(Ordering::Relaxed);
        let failed = self.total_failures.load(Ordering::Relaxed);
        if total >= self.min_requests && (failed as f64 / total as f64) >= self.fail_ratio {
            self.trip();
        }
    }

    fn trip(&self) {
        self.state.store(STATE_OPEN, Ordering::Release);
        *self.opened_at.lock() = Some(Instant::now());
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }
}

pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<AdapterBreaker>>,
    fail_ratio: f64,
    min_requests: u32,
    cooldown: std::time::Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(fail_ratio: f64, min_requests: u32, cooldown: std::time::Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            fail_ratio,
            min_requests,
            cooldown,
        }
    }

    fn get_or_create(&self, adapter: &str) -> Arc<AdapterBreaker> {
        if let Some(b) = self.breakers.get(adapter) {
            return b.clone();
        }
        self.breakers
            .entry(adapter.to_string())
            .or_insert_with(|| Arc::new(AdapterBreaker::new(self.fail_ratio, self.min_requests, self.cooldown)))
            .clone()
    }

    pub fn check(&self, adapter: &str) -> BreakerCheck {
        self.get_or_create(adapter).check()
    }

    pub fn record_success(&self, adapter: &str) {
        self.get_or_create(adapter).record_success();
    }

    pub fn record_failure(&self, adapter: &str) {
        self.get_or_create(adapter).record_failure();
    }

    pub fn is_open(&self, adapter: &str) -> bool {
        self.breakers.get(adapter).map(|b| b.is_open()).unwrap_or(false)
    }

    pub fn retain_adapters(&self, keep: &[String]) {
        self.breakers.retain(|k, _| keep.contains(k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_closed_and_allows() {
        let r = CircuitBreakerRegistry::new(0.5, 2, Duration::from_millis(50));
        assert_eq!(r.check("a"), BreakerCheck::Allowed);
    }

    #[test]
    fn trips_after_min_requests_and_fail_ratio() {
        let r = CircuitBreakerRegistry::new(0.5, 2, Duration::from_secs(60));
        r.record_failure("a");
        assert!(!r.is_open("a"));
        r.record_failure("a");
        assert!(r.is_open("a"));
        assert_eq!(r.check("a"), BreakerCheck::Rejected);
    }

    #[test]
    fn transitions_to_probe_after_cooldown() {
        let r = CircuitBreakerRegistry::new(0.5, 1, Duration::from_millis(10));
        r.record_failure("a");
        assert!(r.is_open("a"));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(r.check("a"), BreakerCheck::Probe);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let r = CircuitBreakerRegistry::new(0.5, 1, Duration::from_millis(10));
        r.record_failure("a");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(r.check("a"), BreakerCheck::Probe);
        r.record_failure("a");
        assert!(r.is_open("a"));
    }

    #[test]
    fn half_open_closes_after_single_probe_success() {
        let r = CircuitBreakerRegistry::new(0.5, 1, Duration::from_millis(10));
        r.record_failure("a");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(r.check("a"), BreakerCheck::Probe);
        r.record_success("a");
        assert!(!r.is_open("a"));
        assert_eq!(r.check("a"), BreakerCheck::Allowed);
    }

    #[test]
    fn repeated_probe_failures_double_cooldown_up_to_cap() {
        let r = CircuitBreakerRegistry::new(0.5, 1, Duration::from_millis(10));
        r.record_failure("a"); // trip, cooldown = 10ms
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(r.check("a"), BreakerCheck::Probe);
        r.record_failure("a"); // probe fails, cooldown doubles to 20ms, re-opens

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(r.check("a"), BreakerCheck::Rejected, "20ms cooldown not yet elapsed");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(r.check("a"), BreakerCheck::Probe, "20ms cooldown elapsed");

        r.record_success("a");
        assert!(!r.is_open("a"));
    }

    #[test]
    fn adapters_are_independent() {
        let r = CircuitBreakerRegistry::new(0.5, 1, Duration::from_secs(60));
        r.record_failure("a");
        assert!(r.is_open("a"));
        assert!(!r.is_open("b"));
    }
}

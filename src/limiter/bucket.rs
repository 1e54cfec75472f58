use parking_lot::Mutex;

struct Inner {
    tokens: f64,
    last_refill_us: u64,
}

/// A single token bucket with a monotonic-microsecond clock supplied by the
/// caller (never read from the wall clock, per `src/time.rs`'s policy).
///
/// Refill and debit happen under one lock held only for the duration of
/// the check, matching the gateway's `BucketInner` which the author
/// deliberately protects with a plain mutex rather than CAS after finding
/// CAS retries livelocked under contention
/// (`jizhuozhi-hermes/gateway/src/proxy/filter/rate_limit.rs`).
pub struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    inner: Mutex<Inner>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            inner: Mutex::new(Inner {
                tokens: capacity,
                last_refill_us: 0,
            }),
        }
    }

    fn refill_locked(&self, inner: &mut Inner, now_us: u64) {
        let elapsed_us = now_us.saturating_sub(inner.last_refill_us);
        if elapsed_us == 0 {
            return;
        }
        let add = (elapsed_us as f64 / 1_000_000.0) * self.rate_per_sec;
        inner.tokens = (inner.tokens + add).min(self.capacity);
        inner.last_refill_us = now_us;
    }

    /// Attempts to take `cost` tokens at `now_us`. Returns `false` without
    /// mutating state beyond the refill if there is insufficient balance.
    pub fn try_take(&self, cost: f64, now_us: u64) -> bool {
        let mut inner = self.inner.lock();
        self.refill_locked(&mut inner, now_us);
        if inner.tokens >= cost {
            inner.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Returns `cost` tokens to the bucket, capped at capacity. Used to
    /// undo a request-token debit when a paired check (e.g. cost bucket)
    /// rejects the same call.
    pub fn refund(&self, cost: f64) {
        let mut inner = self.inner.lock();
        inner.tokens = (inner.tokens + cost).min(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full() {
        let b = TokenBucket::new(1.0, 10.0);
        assert!(b.try_take(10.0, 0));
        assert!(!b.try_take(1.0, 0));
    }

    #[test]
    fn refills_proportional_to_elapsed_time() {
        let b = TokenBucket::new(10.0, 10.0);
        assert!(b.try_take(10.0, 0));
        assert!(!b.try_take(1.0, 50_000));
        assert!(b.try_take(1.0, 100_000));
    }

    #[test]
    fn never_exceeds_capacity() {
        let b = TokenBucket::new(100.0, 5.0);
        assert!(b.try_take(0.0, 0));
        assert!(!b.try_take(6.0, 10_000_000));
        assert!(b.try_take(5.0, 10_000_000));
    }

    #[test]
    fn refund_restores_tokens_capped_at_capacity() {
        let b = TokenBucket::new(1.0, 5.0);
        assert!(b.try_take(5.0, 0));
        b.refund(2.0);
        assert!(b.try_take(2.0, 0));
        assert!(!b.try_take(1.0, 0));
    }
}

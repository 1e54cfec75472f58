//! Dual-dimension token bucket limiter (C2, spec.md §4.2).
//!
//! Every admitted unit of work is charged against two independent buckets:
//! a request-rate bucket (requests/sec) and a cost bucket (micro-USD/sec).
//! Either bucket refusing admission fails the check with a distinct reason,
//! mirroring `original_source/research/poc/rate_limit_poc.py`'s
//! `RateLimiter` which keeps separate `req`/`usd` bucket maps and returns
//! `"rate_limit"` vs `"cost_limit"`.
//!
//! Buckets are keyed per tenant and held in a `DashMap`, the same
//! concurrent-map style the gateway's `RateLimiter` uses
//! (`jizhuozhi-hermes/gateway/src/proxy/filter/rate_limit.rs`), rather than
//! the teacher's `sqlx`-backed session store — there is no persistence
//! requirement for bucket state beyond the periodic snapshot (C9).

mod bucket;

pub use bucket::TokenBucket;

use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RateLimited,
    CostLimited,
}

pub struct Limiter {
    req_rate: f64,
    req_burst: u64,
    cost_rate: f64,
    cost_burst: u64,
    req_buckets: DashMap<String, Arc<TokenBucket>>,
    cost_buckets: DashMap<String, Arc<TokenBucket>>,
}

impl Limiter {
    pub fn new(req_rate: f64, req_burst: u64, cost_rate: f64, cost_burst: u64) -> Self {
        Self {
            req_rate,
            req_burst,
            cost_rate,
            cost_burst,
            req_buckets: DashMap::new(),
            cost_buckets: DashMap::new(),
        }
    }

    fn req_bucket(&self, key: &str) -> Arc<TokenBucket> {
        self.req_buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.req_rate, self.req_burst as f64)))
            .clone()
    }

    fn cost_bucket(&self, key: &str) -> Arc<TokenBucket> {
        self.cost_buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.cost_rate, self.cost_burst as f64)))
            .clone()
    }

    /// Checks and, if admitted, debits one request token plus `cost_micros`
    /// cost tokens for `key` at `now_us` (monotonic microseconds). The
    /// request-rate check runs first: a request that would also blow the
    /// cost budget is reported as rate-limited only if it fails there first,
    /// otherwise as cost-limited, matching the POC's check order.
    pub fn allow(&self, key: &str, cost_micros: f64, now_us: u64) -> Decision {
        let req = self.req_bucket(key);
        if !req.try_take(1.0, now_us) {
            return Decision::RateLimited;
        }
        let cost = self.cost_bucket(key);
        if !cost.try_take(cost_micros, now_us) {
            // refund the request token: this call is fully rejected, not
            // half-admitted.
            req.refund(1.0);
            return Decision::CostLimited;
        }
        Decision::Allow
    }
}

//! Admission pipeline (C5, spec.md §4.5): the single entry point a caller
//! hits per request, composing the token bucket (C2), AIMD window (C3),
//! fair scheduler (C4) and abuse prevention (C7) checks in the order
//! spec.md fixes: structural validation, replay/loop/anomaly, rate and
//! cost limiting, AIMD admission, fair-queue acquisition, then dispatch.

pub mod frame;

use crate::abuse::{AbusePrevention, ThreatLevel};
use crate::aimd::AimdController;
use crate::error::RouterError;
use crate::limiter::{Decision, Limiter};
use crate::metrics_registry::Registry;
use crate::scheduler::FairScheduler;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct AdmissionRequest<'a> {
    pub tenant: &'a str,
    pub session: &'a str,
    pub nonce: &'a str,
    /// The frame's own claimed timestamp (spec.md §3's `Frame.meta`/anti-replay
    /// nonce scope) — caller-supplied, and not trusted as "now" on its own.
    pub ts_s: u64,
    /// The receiving clock's reading at admission time, used to bound how
    /// far `ts_s` may have drifted (spec.md §4.7's `|now - ts| <= REPLAY_WINDOW_S`).
    pub now_s: u64,
    pub fingerprint: &'a str,
    pub cost_micros: f64,
    pub fair_cost: i64,
}

pub struct AdmissionPipeline {
    limiter: Limiter,
    aimd: DashMap<String, Arc<AimdController>>,
    scheduler: Arc<FairScheduler>,
    abuse: AbusePrevention,
    registry: Arc<Registry>,
    admit_timeout: Duration,
    aimd_defaults: (u32, u32, u32, u32, f64),
}

impl AdmissionPipeline {
    pub fn new(
        limiter: Limiter,
        scheduler: Arc<FairScheduler>,
        abuse: AbusePrevention,
        registry: Arc<Registry>,
        admit_timeout: Duration,
        aimd_defaults: (u32, u32, u32, u32, f64),
    ) -> Self {
        Self {
            limiter,
            aimd: DashMap::new(),
            scheduler,
            abuse,
            registry,
            admit_timeout,
            aimd_defaults,
        }
    }

    pub fn abuse(&self) -> &AbusePrevention {
        &self.abuse
    }

    fn aimd_for(&self, session: &str) -> Arc<AimdController> {
        self.aimd
            .entry(session.to_string())
            .or_insert_with(|| {
                let (init, min, max, step, md) = self.aimd_defaults;
                Arc::new(AimdController::new(init, min, max, step, md))
            })
            .clone()
    }

    /// Drops `session`'s AIMD window entirely, for spec.md §4.9's idle
    /// sweep. A no-op (leaves the entry in place) if the session still has
    /// in-flight work, since that would silently strand the window a
    /// pending `complete()` call would otherwise update.
    pub fn evict_session(&self, session: &str) {
        if let Some(entry) = self.aimd.get(session) {
            if entry.in_flight() != 0 {
                return;
            }
        }
        self.aimd.remove(session);
    }

    /// Runs the full admission decision for one request, returning `Ok(())`
    /// once the request has been granted a scheduler slot, or the specific
    /// `RouterError` the first failing check produced.
    pub async fn admit(&self, req: &AdmissionRequest<'_>) -> Result<(), RouterError> {
        let verdict = self.abuse.pre_dispatch_check(
            req.session,
            req.nonce,
            req.ts_s,
            req.now_s,
            req.fingerprint,
            req.cost_micros,
        );
        self.registry.counter("admission_requests_total", None, 1);

        if verdict.level == ThreatLevel::Blocked {
            self.registry.counter("admission_blocked_total", None, 1);
            return Err(RouterError::PolicyDenied {
                reason: verdict.reasons.join(","),
            });
        }

        let now_us = crate::time::now_ms().saturating_mul(1000);
        match self.limiter.allow(req.tenant, req.cost_micros, now_us) {
            Decision::RateLimited => {
                self.registry.counter("admission_rate_limited_total", None, 1);
                return Err(RouterError::RateLimit);
            }
            Decision::CostLimited => {
                self.registry.counter("admission_cost_limited_total", None, 1);
                return Err(RouterError::CostLimit);
            }
            Decision::Allow => {}
        }

        let aimd = self.aimd_for(req.session);
        if !aimd.admit(1) {
            self.registry.counter("admission_window_rejected_total", None, 1);
            return Err(RouterError::RateLimit);
        }

        let result = self
            .scheduler
            .acquire(req.session, req.fair_cost, self.admit_timeout)
            .await;

        if result.is_err() {
            aimd.release(1);
        }
        result
    }

    /// Reports the outcome of a dispatched request back to the AIMD
    /// controller and, on failure, the circuit breaker for `adapter`.
    pub fn complete(&self, session: &str, adapter: &str, now_us: u64, success: bool) {
        let aimd = self.aimd_for(session);
        if success {
            aimd.ack(1);
            self.abuse.circuit_breakers.record_success(adapter);
        } else {
            aimd.release(1);
            aimd.loss();
            self.abuse.circuit_breakers.record_failure(adapter);
        }
        aimd.on_rtt_elapsed(now_us);
        self.scheduler.release(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> AdmissionPipeline {
        let registry = Arc::new(Registry::new(1000));
        let scheduler = Arc::new(FairScheduler::new(10, 250, 500, 64, registry.clone()));
        let limiter = Limiter::new(100.0, 100, 1_000_000.0, 1_000_000);
        let abuse = AbusePrevention::new(5, 30, 3.0, 2, 0.5, 20, Duration::from_secs(30), 60);
        AdmissionPipeline::new(limiter, scheduler, abuse, registry, Duration::from_millis(200), (4, 1, 100, 1, 0.5))
    }

    #[tokio::test]
    async fn clean_request_is_admitted() {
        let p = pipeline();
        let req = AdmissionRequest {
            tenant: "t1",
            session: "s1",
            nonce: "n1",
            ts_s: 0,
            now_s: 0,
            fingerprint: "fp1",
            cost_micros: 10.0,
            fair_cost: 1,
        };
        assert!(p.admit(&req).await.is_ok());
    }

    #[tokio::test]
    async fn replay_is_denied_with_policy_error() {
        let p = pipeline();
        let req = AdmissionRequest {
            tenant: "t1",
            session: "s1",
            nonce: "n1",
            ts_s: 0,
            now_s: 0,
            fingerprint: "fp1",
            cost_micros: 10.0,
            fair_cost: 1,
        };
        p.admit(&req).await.unwrap();
        let req2 = AdmissionRequest { ts_s: 1, now_s: 1, ..req };
        let err = p.admit(&req2).await.unwrap_err();
        assert!(matches!(err, RouterError::PolicyDenied { .. }));
    }

    #[tokio::test]
    async fn evict_session_drops_aimd_entry_once_idle() {
        let p = pipeline();
        let req = AdmissionRequest {
            tenant: "t1",
            session: "s1",
            nonce: "n1",
            ts_s: 0,
            now_s: 0,
            fingerprint: "fp1",
            cost_micros: 10.0,
            fair_cost: 1,
        };
        p.admit(&req).await.unwrap();
        assert!(p.aimd.contains_key("s1"));

        // still in flight: eviction must be a no-op
        p.evict_session("s1");
        assert!(p.aimd.contains_key("s1"));

        p.complete("s1", "adapter-a", 1000, true);
        p.evict_session("s1");
        assert!(!p.aimd.contains_key("s1"));
    }

    #[tokio::test]
    async fn complete_reports_outcome_to_aimd_and_breaker() {
        let p = pipeline();
        let req = AdmissionRequest {
            tenant: "t1",
            session: "s1",
            nonce: "n1",
            ts_s: 0,
            now_s: 0,
            fingerprint: "fp1",
            cost_micros: 10.0,
            fair_cost: 1,
        };
        p.admit(&req).await.unwrap();
        p.complete("s1", "adapter-a", 1000, true);
        assert!(!p.abuse.circuit_breakers.is_open("adapter-a"));

        let req2 = AdmissionRequest {
            nonce: "n2",
            ts_s: 1,
            now_s: 1,
            ..req
        };
        p.admit(&req2).await.unwrap();
        p.complete("s1", "adapter-a", 2000, false);
        // single failure alone shouldn't trip the breaker (min_requests defaults high in this fixture)
        assert!(!p.abuse.circuit_breakers.is_open("adapter-a"));
    }

    #[tokio::test]
    async fn stale_claimed_timestamp_is_denied() {
        let p = pipeline();
        let req = AdmissionRequest {
            tenant: "t1",
            session: "s1",
            nonce: "n1",
            ts_s: 0,
            now_s: 10_000,
            fingerprint: "fp1",
            cost_micros: 10.0,
            fair_cost: 1,
        };
        let err = p.admit(&req).await.unwrap_err();
        assert!(matches!(err, RouterError::PolicyDenied { .. }));
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_is_reported() {
        let registry = Arc::new(Registry::new(1000));
        let scheduler = Arc::new(FairScheduler::new(10, 250, 500, 64, registry.clone()));
        let limiter = Limiter::new(1.0, 1, 1_000_000.0, 1_000_000);
        let abuse = AbusePrevention::new(5, 30, 3.0, 2, 0.5, 20, Duration::from_secs(30), 60);
        let p = AdmissionPipeline::new(limiter, scheduler, abuse, registry, Duration::from_millis(200), (4, 1, 100, 1, 0.5));

        let req = AdmissionRequest {
            tenant: "t1",
            session: "s1",
            nonce: "n1",
            ts_s: 0,
            now_s: 0,
            fingerprint: "fp1",
            cost_micros: 1.0,
            fair_cost: 1,
        };
        p.admit(&req).await.unwrap();
        let req2 = AdmissionRequest {
            nonce: "n2",
            ts_s: 1,
            now_s: 1,
            ..req
        };
        let err = p.admit(&req2).await.unwrap_err();
        assert!(matches!(err, RouterError::RateLimit));
    }
}

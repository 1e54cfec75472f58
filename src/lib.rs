//! Multi-tenant model router admission, fair-scheduling and flow-control
//! core. See each module for the component it implements.

pub mod abuse;
pub mod accounting;
pub mod admin;
pub mod admission;
pub mod aimd;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logger;
pub mod metrics_registry;
pub mod persistence;
pub mod scheduler;
pub mod throttle;
pub mod time;

use std::sync::Arc;
use std::time::Duration;

use crate::abuse::AbusePrevention;
use crate::admission::AdmissionPipeline;
use crate::config::RouterConfig;
use crate::limiter::Limiter;
use crate::metrics_registry::Registry;
use crate::scheduler::FairScheduler;

/// Everything the router needs to admit and schedule requests, built from
/// one [`RouterConfig`]. Mirrors the teacher's `main.rs` wiring of store,
/// executor and scheduler into one set of `Arc`-shared collaborators.
pub struct Router {
    pub config: RouterConfig,
    pub registry: Arc<Registry>,
    pub scheduler: Arc<FairScheduler>,
    pub admission: AdmissionPipeline,
    pub accountant: accounting::Accountant,
    pub predictability: accounting::Predictability,
    pub throttle: throttle::SloAutoThrottle,
    pub idle_tracker: Arc<persistence::IdleTracker>,
    pub admin_keys: parking_lot::Mutex<admin::AdminKeyStore>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let registry = Arc::new(Registry::new(config.metric_label_cap));

        let scheduler = Arc::new(FairScheduler::new(
            10,
            config.fair_starve_ms,
            config.fair_starve_boost_ms,
            config.fair_queue_cap,
            registry.clone(),
        ));

        let limiter = Limiter::new(
            config.rps_limit,
            config.rps_burst,
            config.cost_qps_micros,
            config.cost_burst_micros,
        );

        let abuse = AbusePrevention::new(
            config.loop_n,
            config.loop_window_s,
            config.anomaly_sigma,
            config.anomaly_sustain_ticks,
            config.cb_fail_ratio,
            config.cb_min_req,
            Duration::from_secs(config.cb_cooldown_s),
            config.replay_window_s,
        );

        let admission = AdmissionPipeline::new(
            limiter,
            scheduler.clone(),
            abuse,
            registry.clone(),
            Duration::from_millis(config.admit_timeout_ms),
            (
                config.aimd_min_cap,
                config.aimd_min_cap,
                config.aimd_max_cap,
                config.aimd_ai_step,
                config.aimd_md_factor,
            ),
        );

        let throttle = throttle::SloAutoThrottle::with_heal_ticks(
            config.slo_err,
            config.slo_p95_ms,
            config.aimd_max_cap,
            config.aimd_max_cap,
            config.slo_heal_ticks,
        );

        let admin_keys = match &config.admin_keys {
            Some(spec) => admin::AdminKeyStore::from_spec(spec),
            None => admin::AdminKeyStore::new(),
        };

        Self {
            predictability: accounting::Predictability::new(registry.clone()),
            accountant: accounting::Accountant::new(),
            idle_tracker: Arc::new(persistence::IdleTracker::new()),
            admin_keys: parking_lot::Mutex::new(admin_keys),
            registry,
            scheduler,
            admission,
            throttle,
            config,
        }
    }

    pub fn state_health(&self) -> persistence::StateHealthReport {
        persistence::StateHealthReport {
            backend: "memory",
            status: "ok",
            active_sessions: self.idle_tracker.active_count(),
        }
    }

    pub fn snapshot(&self) -> persistence::StateSnapshot {
        let registry = self.registry.export();
        let rate_limit_dropped = registry
            .counters
            .get("admission_rate_limited_total")
            .copied()
            .unwrap_or(0);
        persistence::StateSnapshot {
            registry,
            fair_weights: self.scheduler.snapshot_weights(),
            rate_limit_dropped,
            promotion_count: 0,
            demotion_count: 0,
        }
    }

    pub async fn restore(&self) {
        if let Ok(Some(snapshot)) = persistence::load(std::path::Path::new(&self.config.snapshot_path)).await {
            self.registry.restore(&snapshot.registry);
            for (session, weight) in snapshot.fair_weights {
                self.scheduler.set_weight(&session, weight);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn router_builds_and_admits() {
        let router = Router::new(RouterConfig::from_map(&HashMap::new()));
        let req = admission::AdmissionRequest {
            tenant: "t1",
            session: "s1",
            nonce: "n1",
            ts_s: 0,
            now_s: 0,
            fingerprint: "fp1",
            cost_micros: 10.0,
            fair_cost: 1,
        };
        assert!(router.admission.admit(&req).await.is_ok());
        let health = router.state_health();
        assert_eq!(health.status, "ok");
    }
}

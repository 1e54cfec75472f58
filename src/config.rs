use std::collections::HashMap;
use std::time::Duration;

/// All tunables named in spec.md §4 and §6, collected into one record.
///
/// Mirrors the teacher's `AppConfig::from_env()` pattern but adds
/// `from_map` so tests can exercise env parsing without touching the real
/// process environment (spec.md §6 enumerates the variables; this struct is
/// the single place that reads them).
#[derive(Clone, Debug)]
pub struct RouterConfig {
    // ===== Admin surface (contract only; transport is external) =====
    pub admin_keys: Option<String>,
    pub admin_api_key: Option<String>,
    pub admin_rps: f64,
    pub admin_rps_burst: u64,

    // ===== Admission (C5) =====
    pub max_prompt_chars: usize,
    pub pii_scrub: bool,
    pub admit_timeout_ms: u64,

    // ===== Token bucket (C2) =====
    pub rps_limit: f64,
    pub rps_burst: u64,
    pub cost_qps_micros: f64,
    pub cost_burst_micros: u64,

    // ===== AIMD (C3) =====
    pub aimd_min_cap: u32,
    pub aimd_max_cap: u32,
    pub aimd_ai_step: u32,
    pub aimd_md_factor: f64,

    // ===== Fair scheduler (C4) =====
    pub fair_starve_ms: u64,
    pub fair_starve_boost_ms: u64,
    pub fair_tick_ms: u64,
    pub fair_queue_cap: usize,

    // ===== SLO auto-throttle (C6) =====
    pub slo_tick_s: u64,
    pub slo_err: f64,
    pub slo_p95_ms: u64,
    pub slo_heal_ticks: u32,
    pub slo_window_s: u64,

    // ===== Abuse prevention (C7) =====
    pub loop_n: u32,
    pub loop_window_s: u64,
    pub cb_fail_ratio: f64,
    pub cb_min_req: u32,
    pub cb_cooldown_s: u64,
    pub replay_window_s: u64,
    pub anomaly_sigma: f64,
    pub anomaly_sustain_ticks: u32,

    // ===== Persistence & lifespan (C9) =====
    pub persist_interval_s: u64,
    pub idle_sweep_s: u64,
    pub idle_ttl_s: u64,
    pub disable_persist_thread: bool,
    pub snapshot_path: String,

    // ===== Metrics (C1) =====
    pub enable_metrics: bool,
    pub metric_label_cap: usize,

    // ===== Downstream adapter client (external collaborator) =====
    pub adapter_client_timeout: Duration,
}

impl RouterConfig {
    pub fn from_env() -> Self {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&env)
    }

    pub fn from_map(env: &HashMap<String, String>) -> Self {
        let get = |k: &str| env.get(k).cloned();
        let parse_or = |k: &str, default: f64| -> f64 {
            get(k).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let parse_u64_or = |k: &str, default: u64| -> u64 {
            get(k).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let parse_bool_or = |k: &str, default: bool| -> bool {
            get(k)
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(default)
        };

        Self {
            admin_keys: get("ROUTER_ADMIN_KEYS"),
            admin_api_key: get("ROUTER_ADMIN_API_KEY"),
            admin_rps: parse_or("ROUTER_ADMIN_RPS", 20.0),
            admin_rps_burst: parse_u64_or("ROUTER_ADMIN_RPS_BURST", 10),

            max_prompt_chars: parse_u64_or("ROUTER_MAX_PROMPT_CHARS", 16_000) as usize,
            pii_scrub: parse_bool_or("ROUTER_PII_SCRUB", false),
            admit_timeout_ms: 250,

            rps_limit: parse_or("ROUTER_RPS_LIMIT", 50.0),
            rps_burst: parse_u64_or("ROUTER_RPS_BURST", 50),
            cost_qps_micros: parse_or("ROUTER_COST_QPS_MICROS", 5_000_000.0),
            cost_burst_micros: parse_u64_or("ROUTER_COST_BURST_MICROS", 5_000_000),

            aimd_min_cap: 1,
            aimd_max_cap: 1000,
            aimd_ai_step: 1,
            aimd_md_factor: 0.5,

            fair_starve_ms: 250,
            fair_starve_boost_ms: 500,
            fair_tick_ms: 10,
            fair_queue_cap: 64,

            slo_tick_s: 1,
            slo_err: 0.01,
            slo_p95_ms: 1500,
            slo_heal_ticks: 5,
            slo_window_s: 10,

            loop_n: 5,
            loop_window_s: 30,
            cb_fail_ratio: 0.5,
            cb_min_req: 20,
            cb_cooldown_s: 30,
            replay_window_s: 60,
            anomaly_sigma: 3.0,
            anomaly_sustain_ticks: 2,

            persist_interval_s: 15,
            idle_sweep_s: 60,
            idle_ttl_s: 900,
            disable_persist_thread: parse_bool_or("ROUTER_DISABLE_PERSIST_THREAD", false),
            snapshot_path: get("ROUTER_SNAPSHOT_PATH").unwrap_or_else(|| "router_state.json".to_string()),

            enable_metrics: parse_bool_or("ROUTER_ENABLE_METRICS", true),
            metric_label_cap: 1000,

            adapter_client_timeout: Duration::from_millis(parse_u64_or("ATP_CLIENT_TIMEOUT", 30_000)),
        }
    }
}

//! Abuse prevention (C7, spec.md §4.7): combines loop detection, anomaly
//! detection, per-adapter circuit breaking and anti-replay into a single
//! verdict consulted by the admission pipeline (C5).

mod anomaly;
mod circuit_breaker;
mod loop_detector;
mod replay;

pub use anomaly::AnomalyDetector;
pub use circuit_breaker::{BreakerCheck, CircuitBreakerRegistry};
pub use loop_detector::LoopDetector;
pub use replay::AntiReplay;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreatLevel {
    None,
    Elevated,
    Blocked,
}

#[derive(Debug)]
pub struct Verdict {
    pub level: ThreatLevel,
    pub reasons: Vec<&'static str>,
}

impl Verdict {
    fn none() -> Self {
        Self {
            level: ThreatLevel::None,
            reasons: vec![],
        }
    }
}

pub struct AbusePrevention {
    pub loop_detector: LoopDetector,
    pub anomaly_detector: AnomalyDetector,
    pub circuit_breakers: CircuitBreakerRegistry,
    pub anti_replay: AntiReplay,
}

impl AbusePrevention {
    pub fn new(
        loop_n: u32,
        loop_window_s: u64,
        anomaly_sigma: f64,
        anomaly_sustain_ticks: u32,
        cb_fail_ratio: f64,
        cb_min_req: u32,
        cb_cooldown: std::time::Duration,
        replay_window_s: u64,
    ) -> Self {
        Self {
            loop_detector: LoopDetector::new(loop_n, loop_window_s),
            anomaly_detector: AnomalyDetector::new(anomaly_sigma, anomaly_sustain_ticks),
            circuit_breakers: CircuitBreakerRegistry::new(cb_fail_ratio, cb_min_req, cb_cooldown),
            anti_replay: AntiReplay::new(replay_window_s),
        }
    }

    /// Runs the replay/loop/anomaly checks that apply before a request is
    /// dispatched to any adapter. The circuit breaker is consulted
    /// separately per adapter once a target has been chosen
    /// (`circuit_breakers.check(adapter)`), since it is keyed by adapter
    /// rather than by session.
    pub fn pre_dispatch_check(
        &self,
        session: &str,
        nonce: &str,
        ts_s: u64,
        now_s: u64,
        fingerprint: &str,
        cost: f64,
    ) -> Verdict {
        if !self.anti_replay.accept(nonce, session, ts_s, now_s) {
            return Verdict {
                level: ThreatLevel::Blocked,
                reasons: vec!["replay"],
            };
        }

        // Loop detection blocks outright per spec.md §4.7 ("count >= LOOP_N
        // within LOOP_WINDOW_S -> block with reason loop"); anomaly alone
        // only elevates, since a single high-cost burst isn't itself abuse.
        if self.loop_detector.record(session, fingerprint, ts_s) {
            return Verdict {
                level: ThreatLevel::Blocked,
                reasons: vec!["loop"],
            };
        }

        if self.anomaly_detector.observe(session, cost) {
            Verdict {
                level: ThreatLevel::Elevated,
                reasons: vec!["anomalous_cost"],
            }
        } else {
            Verdict::none()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn prevention() -> AbusePrevention {
        AbusePrevention::new(5, 30, 3.0, 2, 0.5, 20, Duration::from_secs(30), 60)
    }

    #[test]
    fn clean_request_passes() {
        let p = prevention();
        let v = p.pre_dispatch_check("s1", "n1", 0, 0, "fp", 10.0);
        assert_eq!(v.level, ThreatLevel::None);
    }

    #[test]
    fn replayed_nonce_is_blocked_outright() {
        let p = prevention();
        p.pre_dispatch_check("s1", "n1", 0, 0, "fp", 10.0);
        let v = p.pre_dispatch_check("s1", "n1", 1, 1, "fp", 10.0);
        assert_eq!(v.level, ThreatLevel::Blocked);
        assert!(v.reasons.contains(&"replay"));
    }

    #[test]
    fn stale_timestamp_is_blocked_outright() {
        let p = prevention();
        // claimed ts is 10 minutes behind the caller's clock, well past the 60s replay window
        let v = p.pre_dispatch_check("s1", "n1", 0, 600, "fp", 10.0);
        assert_eq!(v.level, ThreatLevel::Blocked);
        assert!(v.reasons.contains(&"replay"));
    }

    #[test]
    fn looping_fingerprint_is_blocked() {
        let p = prevention();
        for i in 0..5 {
            p.pre_dispatch_check("s1", &format!("n{i}"), i, i, "same-fp", 10.0);
        }
        let v = p.pre_dispatch_check("s1", "n5", 5, 5, "same-fp", 10.0);
        assert_eq!(v.level, ThreatLevel::Blocked);
        assert!(v.reasons.contains(&"loop"));
    }

    #[test]
    fn anomalous_cost_alone_is_elevated_not_blocked() {
        let p = prevention();
        // prime the running mean/stddev with a batch of low-cost, distinct-fingerprint
        // requests so a later outlier registers as an anomaly rather than a loop.
        for i in 0..10 {
            p.pre_dispatch_check("s1", &format!("n{i}"), i, i, &format!("fp{i}"), 1.0);
        }
        let v1 = p.pre_dispatch_check("s1", "n-spike1", 10, 10, "fp-spike1", 1_000_000.0);
        let v2 = p.pre_dispatch_check("s1", "n-spike2", 11, 11, "fp-spike2", 1_000_000.0);
        assert_eq!(v2.level, ThreatLevel::Elevated, "got {v1:?} then {v2:?}");
        assert!(v2.reasons.contains(&"anomalous_cost"));
    }
}

//! Anomaly detector (spec.md §4.7): flags a session whose request cost
//! exceeds its own running mean by more than `sigma` standard deviations,
//! sustained for `sustain_ticks` consecutive observations so a single
//! legitimate spike doesn't trip it.

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Stats {
    count: u64,
    mean: f64,
    m2: f64,
    consecutive_outliers: u32,
}

impl Stats {
    fn update(&mut self, value: f64) -> bool {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
        self.count >= 2
    }

    fn stddev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

pub struct AnomalyDetector {
    sigma: f64,
    sustain_ticks: u32,
    per_session: Mutex<HashMap<String, Stats>>,
}

impl AnomalyDetector {
    pub fn new(sigma: f64, sustain_ticks: u32) -> Self {
        Self {
            sigma,
            sustain_ticks,
            per_session: Mutex::new(HashMap::new()),
        }
    }

    /// Observes `value` for `session` and returns `true` once the session
    /// has exceeded `mean + sigma * stddev` for `sustain_ticks` consecutive
    /// observations in a row.
    pub fn observe(&self, session: &str, value: f64) -> bool {
        let mut sessions = self.per_session.lock();
        let stats = sessions.entry(session.to_string()).or_default();
        let has_baseline = stats.update(value);

        if !has_baseline {
            return false;
        }

        let threshold = stats.mean + self.sigma * stats.stddev();
        if value > threshold {
            stats.consecutive_outliers += 1;
        } else {
            stats.consecutive_outliers = 0;
        }
        stats.consecutive_outliers >= self.sustain_ticks
    }
}

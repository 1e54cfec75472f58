//! SLO auto-throttle (C6, spec.md §4.6).
//!
//! Grounded in `original_source/research/poc/slo_auto_throttle_poc.py`'s
//! `auto_throttle`: on a tick where the observed error rate or p95 latency
//! breaches its threshold, the global window shrinks by 20% (floored at 1);
//! otherwise, once `heal_ticks` consecutive healthy ticks have been
//! observed, it grows by 1 up to a ceiling. A burn-rate alarm fires once
//! per sustained breach episode rather than once per tick, so a ten-minute
//! outage pages once, not six hundred times.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct Observation {
    pub error_rate: f64,
    pub p95_ms: u64,
}

pub struct SloAutoThrottle {
    err_threshold: f64,
    p95_threshold_ms: u64,
    window: AtomicU32,
    window_ceiling: u32,
    heal_ticks: u32,
    healthy_streak: Mutex<u32>,
    alarm_active: AtomicBool,
}

impl SloAutoThrottle {
    pub fn new(err_threshold: f64, p95_threshold_ms: u64, initial_window: u32, window_ceiling: u32) -> Self {
        Self::with_heal_ticks(err_threshold, p95_threshold_ms, initial_window, window_ceiling, 5)
    }

    pub fn with_heal_ticks(err_threshold: f64, p95_threshold_ms: u64, initial_window: u32, window_ceiling: u32, heal_ticks: u32) -> Self {
        Self {
            err_threshold,
            p95_threshold_ms,
            window: AtomicU32::new(initial_window),
            window_ceiling,
            heal_ticks: heal_ticks.max(1),
            healthy_streak: Mutex::new(0),
            alarm_active: AtomicBool::new(false),
        }
    }

    pub fn window(&self) -> u32 {
        self.window.load(Ordering::Relaxed)
    }

    fn breached(&self, obs: &Observation) -> bool {
        obs.error_rate > self.err_threshold || obs.p95_ms > self.p95_threshold_ms
    }

    /// Applies one tick's observation. Returns `true` exactly on the tick
    /// where a new breach episode starts (i.e. the alarm transitions from
    /// inactive to active), so the caller can fire a page/log event once.
    pub fn tick(&self, obs: &Observation) -> bool {
        let breach = self.breached(obs);
        let alarm_rising_edge = breach && !self.alarm_active.swap(breach, Ordering::Relaxed);

        if breach {
            *self.healthy_streak.lock() = 0;
            self.window
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
                    Some(((w as f64 * 0.8) as u32).max(1))
                })
                .ok();
        } else {
            let mut streak = self.healthy_streak.lock();
            *streak += 1;
            if *streak >= self.heal_ticks {
                *streak = 0;
                self.window
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
                        Some((w + 1).min(self.window_ceiling))
                    })
                    .ok();
            }
        }

        alarm_rising_edge
    }
}

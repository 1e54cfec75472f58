//! Loop detector (spec.md §4.7): flags a session issuing the same request
//! fingerprint `loop_n` or more times within `loop_window_s`, the kind of
//! tight client-side retry loop a rate limiter alone wouldn't single out
//! since its absolute rate may stay well under the token bucket's ceiling.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

struct History {
    seen: VecDeque<(String, u64)>,
}

pub struct LoopDetector {
    loop_n: u32,
    window_s: u64,
    per_session: DashMap<String, Mutex<History>>,
}

impl LoopDetector {
    pub fn new(loop_n: u32, window_s: u64) -> Self {
        Self {
            loop_n,
            window_s,
            per_session: DashMap::new(),
        }
    }

    /// Records one occurrence of `fingerprint` for `session` at `now_s` and
    /// returns `true` if this pushes the session over the loop threshold.
    pub fn record(&self, session: &str, fingerprint: &str, now_s: u64) -> bool {
        let entry = self
            .per_session
            .entry(session.to_string())
            .or_insert_with(|| Mutex::new(History { seen: VecDeque::new() }));
        let mut history = entry.lock();
        history.seen.push_back((fingerprint.to_string(), now_s));
        while let Some((_, ts)) = history.seen.front() {
            if now_s.saturating_sub(*ts) > self.window_s {
                history.seen.pop_front();
            } else {
                break;
            }
        }
        let matching = history.seen.iter().filter(|(fp, _)| fp == fingerprint).count();
        matching as u32 >= self.loop_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_not_flagged() {
        let d = LoopDetector::new(5, 30);
        for i in 0..4 {
            assert!(!d.record("s1", "fp-a", i));
        }
    }

    #[test]
    fn reaching_threshold_flags() {
        let d = LoopDetector::new(5, 30);
        for i in 0..4 {
            assert!(!d.record("s1", "fp-a", i));
        }
        assert!(d.record("s1", "fp-a", 4));
    }

    #[test]
    fn old_entries_fall_out_of_window() {
        let d = LoopDetector::new(3, 10);
        d.record("s1", "fp-a", 0);
        d.record("s1", "fp-a", 1);
        assert!(!d.record("s1", "fp-a", 50));
    }

    #[test]
    fn different_fingerprints_do_not_combine() {
        let d = LoopDetector::new(3, 30);
        assert!(!d.record("s1", "fp-a", 0));
        assert!(!d.record("s1", "fp-b", 0));
        assert!(!d.record("s1", "fp-a", 1));
    }
}

//! Anti-replay guard (spec.md §4.7), grounded in
//! `original_source/research/poc/anti_replay_poc.py`'s `AntiReplay`:
//! hash `nonce|ts|session`, remember it for `window_s`, reject repeats, and
//! reject anything whose claimed `ts` has drifted more than `window_s` from
//! the caller's own clock — a hash that's never been seen is only "first
//! use" if it could plausibly have been generated now.
//!
//! The POC keeps one unbounded `set[str]`; this keeps a map bucketed by
//! `ts / bucket_s`, so expiring a whole bucket at once is O(1) amortized
//! instead of scanning every stored hash on each check.

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub struct AntiReplay {
    window_s: u64,
    bucket_s: u64,
    buckets: DashMap<u64, Mutex<std::collections::HashSet<String>>>,
}

fn hash(nonce: &str, ts_s: u64, session: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{nonce}|{ts_s}|{session}").as_bytes());
    format!("{:x}", hasher.finalize())
}

impl AntiReplay {
    pub fn new(window_s: u64) -> Self {
        Self {
            window_s,
            bucket_s: (window_s / 4).max(1),
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` iff `(nonce, session, ts_s)` is both fresh — `ts_s`
    /// within `window_s` of the caller-supplied `now_s` — and hasn't been
    /// seen before within the window. `now_s` and `ts_s` share the same
    /// clock (monotonic seconds, supplied by the caller per `src/time.rs`'s
    /// policy); they may differ because `ts_s` is the frame's own claimed
    /// timestamp while `now_s` is when this check actually runs.
    pub fn accept(&self, nonce: &str, session: &str, ts_s: u64, now_s: u64) -> bool {
        if now_s.abs_diff(ts_s) > self.window_s {
            return false;
        }

        let h = hash(nonce, ts_s, session);
        let bucket_key = ts_s / self.bucket_s;

        for entry in self.buckets.iter() {
            if *entry.key() * self.bucket_s + self.window_s < now_s {
                continue;
            }
            if entry.value().lock().contains(&h) {
                return false;
            }
        }

        self.buckets.entry(bucket_key).or_default().lock().insert(h);
        self.evict_expired(now_s);
        true
    }

    fn evict_expired(&self, now_s: u64) {
        self.buckets
            .retain(|bucket_key, _| bucket_key * self.bucket_s + self.window_s >= now_s);
    }
}

//! Per-session scheduling state, grounded in the teacher's
//! `backend/src/session/model.rs` (`SessionState` with `deficit`,
//! `quantum`, `last_served_ms`) and `backend/src/scheduler/drr.rs`
//! (`accumulate_credit`/`can_serve`/`charge`, all saturating).

use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::oneshot;

use crate::error::RouterError;

/// One waiting request for a session's queue. Distinct from the session's
/// fairness bookkeeping: many `Waiter`s can be enqueued for one `Session`.
pub struct Waiter {
    pub enqueued_at: Instant,
    pub cost: i64,
    pub grant: oneshot::Sender<Result<(), RouterError>>,
}

pub struct Session {
    pub id: String,
    pub weight: f64,
    pub deficit: i64,
    pub served_count: u64,
    pub last_served_ms: u64,
    pub queue: VecDeque<Waiter>,
}

/// Deficit is capped at twice a session's quantum, the same bound the
/// teacher's `accumulate_credit` enforces (`preferred_chunk_bid * 2`), so a
/// long-idle low-traffic session cannot bank an unbounded head start.
fn deficit_cap(quantum: i64) -> i64 {
    quantum.saturating_mul(2)
}

impl Session {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight: if weight > 0.0 { weight } else { 1.0 },
            deficit: 0,
            served_count: 0,
            last_served_ms: 0,
            queue: VecDeque::new(),
        }
    }

    /// Scales the integer deficit quantum by this session's (real-valued)
    /// weight, rounding to the nearest unit rather than truncating so a
    /// weight like 0.5 still accrues credit over several rounds instead of
    /// rounding to zero forever.
    fn quantum(&self, base_quantum: i64) -> i64 {
        ((base_quantum as f64) * self.weight).round() as i64
    }

    /// Adds one round's worth of credit, capped at `deficit_cap`.
    pub fn accumulate_credit(&mut self, base_quantum: i64) {
        let q = self.quantum(base_quantum);
        let cap = deficit_cap(q);
        self.deficit = self.deficit.saturating_add(q).min(cap);
    }

    pub fn can_serve(&self, cost: i64) -> bool {
        self.deficit >= cost
    }

    pub fn charge(&mut self, cost: i64) {
        self.deficit = self.deficit.saturating_sub(cost);
    }

    pub fn is_starved(&self, now_ms: u64, starve_ms: u64) -> bool {
        !self.queue.is_empty() && now_ms.saturating_sub(self.last_served_ms) >= starve_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_credit_respects_cap() {
        let mut s = Session::new("a", 1.0);
        for _ in 0..100 {
            s.accumulate_credit(10);
        }
        assert_eq!(s.deficit, deficit_cap(10));
    }

    #[test]
    fn weight_scales_quantum() {
        let mut a = Session::new("a", 1.0);
        let mut b = Session::new("b", 2.0);
        a.accumulate_credit(10);
        b.accumulate_credit(10);
        assert_eq!(a.deficit, 10);
        assert_eq!(b.deficit, 20);
    }

    #[test]
    fn fractional_weight_scales_quantum_by_rounding() {
        let mut a = Session::new("a", 7.5);
        let mut b = Session::new("b", 3.3);
        a.accumulate_credit(10);
        b.accumulate_credit(10);
        assert_eq!(a.deficit, 75);
        assert_eq!(b.deficit, 33);
    }

    #[test]
    fn non_positive_weight_falls_back_to_one() {
        let s = Session::new("a", 0.0);
        assert_eq!(s.weight, 1.0);
    }

    #[test]
    fn charge_saturates_at_zero() {
        let mut s = Session::new("a", 1.0);
        s.accumulate_credit(10);
        s.charge(100);
        assert_eq!(s.deficit, 0);
    }

    #[test]
    fn can_serve_boundary() {
        let mut s = Session::new("a", 1.0);
        s.accumulate_credit(10);
        assert!(s.can_serve(10));
        assert!(!s.can_serve(11));
    }
}

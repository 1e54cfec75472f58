//! Deficit-weighted fair queueing scheduler (C4, spec.md §4.4).
//!
//! Grounded in the teacher's `backend/src/scheduler/scheduler.rs` (the
//! `on_tick` → `pick_intents` → DRR credit/charge cycle) and
//! `backend/src/session/cache.rs` (a `parking_lot::Mutex`-guarded map plus a
//! round-robin ring, rather than one lock per session). The exact external
//! shape — `set_weight`/`snapshot_weights`/`acquire`/`release` and the
//! `fair_sched_wait_ms` histogram / `fair_sched_weighted_sessions` gauge —
//! follows `original_source/tests/test_fair_scheduler_*.py`.
//!
//! A tick (periodic) and a release (event-driven) both run the same
//! dispatch pass under the same lock, so there is exactly one code path
//! that decides who gets served next; the two call sites only differ in
//! what wakes them, not what they do once woken. Sessions past
//! `starve_ms` without service get a one-time deficit boost of
//! `starve_boost_ms` worth of quantum so a starved low-weight session is
//! never locked out indefinitely by higher-weight neighbors.

mod session;

pub use session::{Session, Waiter};

use crate::error::RouterError;
use crate::metrics_registry::Registry;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

const WAIT_BUCKETS: [f64; 7] = [1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0];

struct State {
    sessions: HashMap<String, Session>,
    rr_order: VecDeque<String>,
}

pub struct FairScheduler {
    state: Mutex<State>,
    base_quantum: i64,
    starve_ms: u64,
    starve_boost_ms: u64,
    queue_cap: usize,
    registry: Arc<Registry>,
}

impl FairScheduler {
    pub fn new(
        base_quantum: i64,
        starve_ms: u64,
        starve_boost_ms: u64,
        queue_cap: usize,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                sessions: HashMap::new(),
                rr_order: VecDeque::new(),
            }),
            base_quantum,
            starve_ms,
            starve_boost_ms,
            queue_cap,
            registry,
        }
    }

    fn ensure_session(state: &mut State, id: &str) {
        if !state.sessions.contains_key(id) {
            state.sessions.insert(id.to_string(), Session::new(id, 1.0));
            state.rr_order.push_back(id.to_string());
        }
    }

    pub fn set_weight(&self, session_id: &str, weight: f64) {
        let mut state = self.state.lock();
        Self::ensure_session(&mut state, session_id);
        state.sessions.get_mut(session_id).unwrap().weight = if weight > 0.0 { weight } else { 1.0 };
    }

    pub fn snapshot_weights(&self) -> HashMap<String, f64> {
        let state = self.state.lock();
        state
            .sessions
            .iter()
            .map(|(k, v)| (k.clone(), v.weight))
            .collect()
    }

    /// Removes `session_id` from the scheduler's session map and RR ring,
    /// for spec.md §4.9's idle-sweep: only safe to call once the caller has
    /// confirmed the session has no in-flight work. A session with a
    /// non-empty waiter queue is never evicted, even if asked, since that
    /// would drop pending grants silently instead of surfacing a terminal
    /// failure to them.
    pub fn evict(&self, session_id: &str) {
        let mut state = self.state.lock();
        let Some(session) = state.sessions.get(session_id) else {
            return;
        };
        if !session.queue.is_empty() {
            return;
        }
        state.sessions.remove(session_id);
        state.rr_order.retain(|id| id != session_id);
    }

    /// Queues a request for `session_id` costing `cost` deficit units and
    /// waits up to `timeout` to be dispatched. Returns `Err(RouterError::AdmissionTimeout)`
    /// if the queue for this session is already at capacity (rejected
    /// immediately, never queued past `queue_cap`) or if `timeout` elapses
    /// first.
    pub async fn acquire(&self, session_id: &str, cost: i64, timeout: Duration) -> Result<(), RouterError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            Self::ensure_session(&mut state, session_id);
            let session = state.sessions.get_mut(session_id).unwrap();
            if session.queue.len() >= self.queue_cap {
                self.registry.counter("fair_sched_queue_rejected_total", Some(session_id), 1);
                return Err(RouterError::AdmissionTimeout);
            }
            session.queue.push_back(Waiter {
                enqueued_at: Instant::now(),
                cost,
                grant: tx,
            });
            self.dispatch_locked(&mut state);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RouterError::Cancelled),
            Err(_) => Err(RouterError::AdmissionTimeout),
        }
    }

    /// Runs one dispatch pass. Called periodically by the scheduler's
    /// background tick task (`start_scheduler_loop` in `main.rs`) so
    /// sessions accrue credit and starved queues drain even with no new
    /// arrivals.
    pub fn tick(&self) {
        let mut state = self.state.lock();
        self.dispatch_locked(&mut state);
    }

    /// Signals that `session_id` has finished the work an earlier
    /// `acquire` granted it. Concurrency isn't itself capped here — cost is
    /// charged against deficit at grant time, not held until release — but
    /// a release is still a useful moment to run a dispatch pass, since a
    /// weight change or a burst of new arrivals queued behind this
    /// session's turn should not have to wait for the next tick.
    pub fn release(&self, _session_id: &str) {
        let mut state = self.state.lock();
        self.dispatch_locked(&mut state);
    }

    fn dispatch_locked(&self, state: &mut State) {
        let now_ms = crate::time::now_ms();
        loop {
            let mut served_any = false;
            let ids: Vec<String> = state.rr_order.iter().cloned().collect();
            for id in ids {
                let Some(session) = state.sessions.get_mut(&id) else {
                    continue;
                };
                if session.queue.is_empty() {
                    continue;
                }
                session.accumulate_credit(self.base_quantum);
                if session.is_starved(now_ms, self.starve_ms) {
                    session.deficit = session.deficit.saturating_add(self.starve_boost_ms as i64);
                    self.registry.counter("fair_sched_starvation_boost_total", Some(&id), 1);
                }
                let cost = session.queue.front().map(|w| w.cost).unwrap_or(0);
                if !session.can_serve(cost) {
                    continue;
                }
                let waiter = session.queue.pop_front().expect("checked non-empty above");
                session.charge(cost);
                session.served_count += 1;
                session.last_served_ms = now_ms;

                let wait_ms = waiter.enqueued_at.elapsed().as_millis() as f64;
                self.registry.histogram("fair_sched_wait_ms", &WAIT_BUCKETS, wait_ms);
                let _ = waiter.grant.send(Ok(()));
                served_any = true;
            }
            self.registry
                .gauge_set("fair_sched_weighted_sessions", state.sessions.len() as i64);
            if !served_any {
                break;
            }
        }
    }
}

//! Lifespan management: periodic snapshot persistence, idle-session
//! sweeping, and cooperative shutdown, grounded in the teacher's
//! `start_scheduler_loop` (`tokio::time::interval`-driven background task
//! pattern in `backend/src/main.rs`) and in
//! `original_source/tests/test_lifespan_cleanup.py`'s async context-manager
//! shutdown semantics — translated here into a `tokio::sync::watch`
//! shutdown signal rather than a Python async-with block.

use super::snapshot::{StateSnapshot, save};
use crate::error::RouterError;
use crate::logger::warn_if_slow;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone, Debug, Serialize)]
pub struct StateHealthReport {
    pub backend: &'static str,
    pub status: &'static str,
    pub active_sessions: usize,
}

/// Tracks the last-active timestamp (monotonic ms) for each session so
/// idle ones can be swept out of the fair scheduler and AIMD maps.
pub struct IdleTracker {
    last_active_ms: DashMap<String, u64>,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self {
            last_active_ms: DashMap::new(),
        }
    }

    pub fn touch(&self, session: &str, now_ms: u64) {
        self.last_active_ms.insert(session.to_string(), now_ms);
    }

    /// Returns the session ids that have been idle for at least `ttl_ms`
    /// and removes them from tracking.
    pub fn sweep(&self, now_ms: u64, ttl_ms: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .last_active_ms
            .iter()
            .filter(|e| now_ms.saturating_sub(*e.value()) >= ttl_ms)
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.last_active_ms.remove(id);
        }
        expired
    }

    pub fn active_count(&self) -> usize {
        self.last_active_ms.len()
    }
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the periodic snapshot-persist task. `shutdown` resolving ends the
/// loop after one final save, so the last in-memory state before shutdown
/// is never lost between persist ticks.
pub fn spawn_persist_task(
    interval: Duration,
    path: PathBuf,
    snapshot_source: impl Fn() -> StateSnapshot + Send + Sync + 'static,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = snapshot_source();
                    let res = warn_if_slow("persist_snapshot", Duration::from_millis(500), save(&path, &snapshot)).await;
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "snapshot persist failed");
                    }
                }
                _ = shutdown.changed() => {
                    let snapshot = snapshot_source();
                    if let Err(e) = save(&path, &snapshot).await {
                        tracing::warn!(error = %e, "final snapshot persist failed");
                    }
                    break;
                }
            }
        }
    })
}

/// Spawns the idle-session sweep task. On each tick, sessions idle past
/// `ttl` are removed from `tracker` and handed to `on_expire` so the caller
/// can drop their scheduler/AIMD state and wake any pending waiters with a
/// terminal failure rather than leaving them to time out naturally.
pub fn spawn_idle_sweep_task(
    interval: Duration,
    ttl: Duration,
    tracker: Arc<IdleTracker>,
    on_expire: impl Fn(&str) + Send + Sync + 'static,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_ms = crate::time::now_ms();
                    for session in tracker.sweep(now_ms, ttl.as_millis() as u64) {
                        on_expire(&session);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Error handed to any scheduler waiter still pending when shutdown begins.
pub fn shutdown_error() -> RouterError {
    RouterError::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_removes_only_expired_sessions() {
        let t = IdleTracker::new();
        t.touch("fresh", 1000);
        t.touch("stale", 0);
        let expired = t.sweep(1000, 500);
        assert_eq!(expired, vec!["stale".to_string()]);
        assert_eq!(t.active_count(), 1);
    }

    #[test]
    fn swept_sessions_are_not_returned_twice() {
        let t = IdleTracker::new();
        t.touch("a", 0);
        assert_eq!(t.sweep(1000, 500), vec!["a".to_string()]);
        assert_eq!(t.sweep(2000, 500), Vec::<String>::new());
    }

    #[tokio::test]
    async fn persist_task_runs_final_save_on_shutdown() {
        let dir = std::env::temp_dir().join("tollgate-lifespan-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("state.json");

        let (tx, rx) = watch::channel(false);
        let handle = spawn_persist_task(
            Duration::from_secs(3600),
            path.clone(),
            || StateSnapshot::default(),
            rx,
        );
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(path.exists());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}

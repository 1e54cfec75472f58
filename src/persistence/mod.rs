//! Persistence & lifespan (C9, spec.md §4.9).

pub mod lifespan;
pub mod snapshot;

pub use lifespan::{IdleTracker, StateHealthReport, shutdown_error, spawn_idle_sweep_task, spawn_persist_task};
pub use snapshot::{SnapshotError, StateSnapshot, load, save};

//! JSON state snapshot (spec.md §4.9), saved and loaded the way the
//! teacher persists session state through its repository layer, but to a
//! single file rather than a database: this router holds no durable data
//! beyond in-memory counters and fairness weights, so a periodic JSON dump
//! is sufficient recovery for a restart.

use crate::metrics_registry::Snapshot as MetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub registry: MetricsSnapshot,
    pub fair_weights: HashMap<String, f64>,
    pub rate_limit_dropped: u64,
    pub promotion_count: u64,
    pub demotion_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write snapshot file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize snapshot: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Writes `snapshot` to `path` atomically: serialize to a sibling temp file
/// then rename over the destination, so a crash mid-write never leaves a
/// half-written snapshot for the next startup to trip over.
pub async fn save(path: &Path, snapshot: &StateSnapshot) -> Result<(), SnapshotError> {
    let body = serde_json::to_vec_pretty(snapshot).map_err(SnapshotError::Serialize)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &body)
        .await
        .map_err(SnapshotError::Write)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(SnapshotError::Write)?;
    Ok(())
}

/// Loads a previously saved snapshot. Returns `Ok(None)` if `path` does not
/// exist yet, which is the normal state on first boot.
pub async fn load(path: &Path) -> Result<Option<StateSnapshot>, SnapshotError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let snapshot = serde_json::from_slice(&bytes).map_err(SnapshotError::Deserialize)?;
            Ok(Some(snapshot))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SnapshotError::Read(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("tollgate-snapshot-test-{:?}", std::thread::current().id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("state.json");

        let mut snapshot = StateSnapshot::default();
        snapshot.fair_weights.insert("persistA".to_string(), 7.5);
        snapshot.fair_weights.insert("persistB".to_string(), 3.3);
        snapshot.rate_limit_dropped = 7;

        save(&path, &snapshot).await.unwrap();
        let loaded = load(&path).await.unwrap().expect("snapshot should exist");
        assert_eq!(loaded.fair_weights["persistA"], 7.5);
        assert_eq!(loaded.fair_weights["persistB"], 3.3);
        assert_eq!(loaded.rate_limit_dropped, 7);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let path = std::env::temp_dir().join("tollgate-does-not-exist.json");
        let loaded = load(&path).await.unwrap();
        assert!(loaded.is_none());
    }
}

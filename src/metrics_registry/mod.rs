//! Metrics Registry (C1, spec.md §4.1).
//!
//! Counters and gauges are plain atomics keyed by metric name. Histograms
//! use fixed bucket boundaries supplied at creation and are protected by a
//! lock scoped to that single histogram (never a registry-wide lock), per
//! spec.md §5's narrowest-mutex policy.
//!
//! Label cardinality is bounded per metric: once a metric has accumulated
//! `label_cap` distinct label values, further unseen values collapse into a
//! shared `"dropped"` bucket and `metrics_registry_dropped_total` increments.
//! This is the structured analogue of the gateway's Prometheus exporter
//! (`jizhuozhi-hermes/gateway/src/metrics/registry.rs`) generalized into an
//! owned, serializable snapshot rather than text exposition, because
//! spec.md's `export() -> snapshot` must be consumed by the persistence
//! snapshot (C9), not just rendered for scraping.

mod cardinality;
mod histogram;

pub use cardinality::CardinalityGuard;
pub use histogram::Histogram;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

const DROPPED_LABEL: &str = "dropped";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub counters: std::collections::BTreeMap<String, u64>,
    pub gauges: std::collections::BTreeMap<String, i64>,
    pub histograms: std::collections::BTreeMap<String, HistogramSnapshot>,
}

/// A single labeled counter/gauge key: `metric_name{label}`. Labels beyond
/// the cardinality cap are folded into [`DROPPED_LABEL`] by the guard.
fn label_key(metric: &str, label: Option<&str>) -> String {
    match label {
        Some(l) => format!("{metric}{{{l}}}"),
        None => metric.to_string(),
    }
}

pub struct Registry {
    counters: DashMap<String, Arc<AtomicU64>>,
    gauges: DashMap<String, Arc<AtomicI64>>,
    histograms: DashMap<String, Arc<Histogram>>,
    guard: CardinalityGuard,
}

impl Registry {
    pub fn new(label_cap: usize) -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            guard: CardinalityGuard::new(label_cap),
        }
    }

    fn resolve_label<'a>(&self, metric: &str, label: &'a str) -> &'static str {
        if self.guard.allow(metric, label) {
            // Leak-free: we never need the exact allowed label back, the
            // caller already owns it. We only need the dropped sentinel.
            ""
        } else {
            DROPPED_LABEL
        }
    }

    /// Increments a counter. If `label` is set and the cardinality cap for
    /// `metric` has been exceeded, the increment is folded into the
    /// `"dropped"` label and `metrics_registry_dropped_total` increments.
    pub fn counter(&self, metric: &str, label: Option<&str>, delta: u64) {
        let key = match label {
            None => label_key(metric, None),
            Some(l) => {
                if self.resolve_label(metric, l).is_empty() {
                    label_key(metric, Some(l))
                } else {
                    self.counters
                        .entry("metrics_registry_dropped_total".to_string())
                        .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                        .fetch_add(1, Ordering::Relaxed);
                    label_key(metric, Some(DROPPED_LABEL))
                }
            }
        };
        self.counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn gauge_set(&self, metric: &str, value: i64) {
        self.gauges
            .entry(metric.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .store(value, Ordering::Relaxed);
    }

    pub fn gauge_add(&self, metric: &str, delta: i64) {
        self.gauges
            .entry(metric.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn gauge_get(&self, metric: &str) -> i64 {
        self.gauges
            .get(metric)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Registers (if absent) and observes into a histogram with fixed
    /// bucket upper bounds, e.g. `[0.05, 0.1, 0.2, 0.3, 0.5, 1.0]`.
    pub fn histogram(&self, metric: &str, bounds: &[f64], value: f64) {
        let h = self
            .histograms
            .entry(metric.to_string())
            .or_insert_with(|| Arc::new(Histogram::new(bounds.to_vec())))
            .clone();
        h.observe(value);
    }

    /// Single consistent snapshot (copy-on-read) per spec.md §4.1.
    pub fn export(&self) -> Snapshot {
        let counters = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        let gauges = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        let histograms = self
            .histograms
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        Snapshot {
            counters,
            gauges,
            histograms,
        }
    }

    /// Restores counters/gauges from a previously exported snapshot. Used by
    /// persistence (C9) on startup; histograms are not restored (they are
    /// sampling aids, not durable accounting state).
    pub fn restore(&self, snapshot: &Snapshot) {
        for (k, v) in &snapshot.counters {
            self.counters
                .entry(k.clone())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .store(*v, Ordering::Relaxed);
        }
        for (k, v) in &snapshot.gauges {
            self.gauges
                .entry(k.clone())
                .or_insert_with(|| Arc::new(AtomicI64::new(0)))
                .store(*v, Ordering::Relaxed);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let r = Registry::new(1000);
        r.counter("requests_total", None, 1);
        r.counter("requests_total", None, 2);
        assert_eq!(r.export().counters["requests_total"], 3);
    }

    #[test]
    fn gauge_set_and_add() {
        let r = Registry::new(1000);
        r.gauge_set("in_flight", 5);
        r.gauge_add("in_flight", -2);
        assert_eq!(r.gauge_get("in_flight"), 3);
    }

    #[test]
    fn histogram_buckets_accumulate() {
        let r = Registry::new(1000);
        for v in [0.01, 0.04, 0.2, 0.9] {
            r.histogram("latency", &[0.05, 0.1, 0.5, 1.0], v);
        }
        let snap = r.export();
        let h = &snap.histograms["latency"];
        assert_eq!(h.count, 4);
        assert_eq!(h.counts.iter().sum::<u64>(), 4);
    }

    #[test]
    fn label_cardinality_cap_folds_into_dropped() {
        let r = Registry::new(2);
        r.counter("per_tenant_total", Some("a"), 1);
        r.counter("per_tenant_total", Some("b"), 1);
        r.counter("per_tenant_total", Some("c"), 1); // over cap, folds to dropped

        let snap = r.export();
        assert!(snap.counters.contains_key("per_tenant_total{a}"));
        assert!(snap.counters.contains_key("per_tenant_total{b}"));
        assert!(snap.counters.contains_key("per_tenant_total{dropped}"));
        assert_eq!(snap.counters["metrics_registry_dropped_total"], 1);
    }

    #[test]
    fn export_is_copy_on_read() {
        let r = Registry::new(1000);
        r.counter("x", None, 1);
        let snap = r.export();
        r.counter("x", None, 100);
        assert_eq!(snap.counters["x"], 1);
    }
}

use dashmap::DashMap;
use dashmap::DashSet;

/// Bounds the number of distinct label values tracked per metric name.
///
/// Grounded in `original_source/research/poc/metrics_cardinality_poc.py`'s
/// `CardinalityGuard`: once a metric has seen `cap` distinct labels, any
/// further unseen label is rejected so the caller can fold it into a
/// `"dropped"` bucket instead of growing the registry without bound.
pub struct CardinalityGuard {
    cap: usize,
    seen: DashMap<String, DashSet<String>>,
}

impl CardinalityGuard {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            seen: DashMap::new(),
        }
    }

    /// Returns `true` if `label` is (or becomes) a tracked value for
    /// `metric`; `false` if the cap is already full and `label` is new.
    pub fn allow(&self, metric: &str, label: &str) -> bool {
        let set = self.seen.entry(metric.to_string()).or_default();
        if set.contains(label) {
            return true;
        }
        if set.len() >= self.cap {
            return false;
        }
        set.insert(label.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_cap() {
        let g = CardinalityGuard::new(2);
        assert!(g.allow("m", "a"));
        assert!(g.allow("m", "b"));
        assert!(!g.allow("m", "c"));
    }

    #[test]
    fn reseeing_known_label_always_allowed() {
        let g = CardinalityGuard::new(1);
        assert!(g.allow("m", "a"));
        assert!(!g.allow("m", "b"));
        assert!(g.allow("m", "a"));
    }

    #[test]
    fn caps_are_independent_per_metric() {
        let g = CardinalityGuard::new(1);
        assert!(g.allow("m1", "a"));
        assert!(g.allow("m2", "a"));
    }
}

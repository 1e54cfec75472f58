use parking_lot::Mutex;

use super::HistogramSnapshot;

struct Inner {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Fixed-bucket histogram. `bounds` are upper bounds (inclusive), in
/// ascending order; an implicit `+Inf` bucket catches anything above the
/// last bound, matching the bucket layout the gateway's latency/size
/// histograms use (`jizhuozhi-hermes/gateway/src/metrics/registry.rs`).
pub struct Histogram {
    bounds: Vec<f64>,
    inner: Mutex<Inner>,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        let len = bounds.len() + 1;
        Self {
            bounds,
            inner: Mutex::new(Inner {
                counts: vec![0; len],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(self.bounds.len());
        let mut inner = self.inner.lock();
        inner.counts[idx] += 1;
        inner.sum += value;
        inner.count += 1;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = self.inner.lock();
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            counts: inner.counts.clone(),
            sum: inner.sum,
            count: inner.count,
        }
    }
}

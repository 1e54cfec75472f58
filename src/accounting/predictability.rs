use crate::metrics_registry::Registry;
use std::sync::Arc;

const MAPE_BUCKETS: [f64; 6] = [0.05, 0.1, 0.2, 0.3, 0.5, 1.0];

/// Mean absolute percentage error between `predicted` and `observed`,
/// matching `original_source/services/router/adapter_predictability.py`'s
/// `_mape`. Returns `0.0` when `predicted` is zero to avoid division by
/// zero; a zero prediction with a nonzero observation is always a full
/// under-estimate, which the caller's separate counter already captures.
fn mape(predicted: f64, observed: f64) -> f64 {
    if predicted == 0.0 {
        return 0.0;
    }
    ((observed - predicted) / predicted).abs()
}

pub struct Predictability {
    registry: Arc<Registry>,
}

impl Predictability {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Records the prediction error for one adapter's token and cost
    /// estimates against what was actually observed.
    pub fn record(&self, adapter: &str, predicted_tokens: f64, observed_tokens: f64, predicted_usd: f64, observed_usd: f64) {
        let tokens_mape = mape(predicted_tokens, observed_tokens);
        let usd_mape = mape(predicted_usd, observed_usd);

        self.registry
            .histogram("adapter_estimate_mape_tokens", &MAPE_BUCKETS, tokens_mape);
        self.registry
            .histogram("adapter_estimate_mape_usd", &MAPE_BUCKETS, usd_mape);

        if observed_tokens > predicted_tokens {
            self.registry
                .counter("router_estimate_under_rate_tokens_total", Some(adapter), 1);
        }
        if observed_usd > predicted_usd {
            self.registry
                .counter("router_estimate_under_rate_usd_total", Some(adapter), 1);
        }
    }
}

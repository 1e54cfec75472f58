//! Cost accounting (C8, spec.md §4.8).
//!
//! `Accountant` is grounded in
//! `original_source/research/poc/cost_accounting_poc.py`'s `Accountant`
//! (per-tenant and per-adapter running totals of tokens and micro-USD
//! cost). `predictability` is grounded in
//! `original_source/services/router/adapter_predictability.py`, which
//! records MAPE (mean absolute percentage error) between an adapter's
//! predicted cost/token estimate and the observed outcome into the metrics
//! registry's histograms, and bumps an "under-estimate" counter whenever
//! the observation exceeds the prediction.

mod predictability;

pub use predictability::Predictability;

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default)]
pub struct Totals {
    pub in_tokens: u64,
    pub out_tokens: u64,
    pub usd_micros: u64,
}

impl Totals {
    fn add(&mut self, other: &Totals) {
        self.in_tokens += other.in_tokens;
        self.out_tokens += other.out_tokens;
        self.usd_micros += other.usd_micros;
    }
}

pub struct Event {
    pub tenant: String,
    pub adapter: String,
    pub in_tokens: u64,
    pub out_tokens: u64,
    pub usd_micros: u64,
}

#[derive(Default)]
pub struct Accountant {
    by_tenant: Mutex<HashMap<String, Totals>>,
    by_adapter: Mutex<HashMap<String, Totals>>,
}

impl Accountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &Event) {
        let delta = Totals {
            in_tokens: event.in_tokens,
            out_tokens: event.out_tokens,
            usd_micros: event.usd_micros,
        };
        self.by_tenant
            .lock()
            .entry(event.tenant.clone())
            .or_default()
            .add(&delta);
        self.by_adapter
            .lock()
            .entry(event.adapter.clone())
            .or_default()
            .add(&delta);
    }

    pub fn report(&self) -> (HashMap<String, Totals>, HashMap<String, Totals>) {
        (self.by_tenant.lock().clone(), self.by_adapter.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_by_tenant_and_adapter() {
        let a = Accountant::new();
        a.record(&Event {
            tenant: "t1".into(),
            adapter: "gpt".into(),
            in_tokens: 10,
            out_tokens: 20,
            usd_micros: 100,
        });
        a.record(&Event {
            tenant: "t1".into(),
            adapter: "claude".into(),
            in_tokens: 5,
            out_tokens: 5,
            usd_micros: 50,
        });

        let (by_tenant, by_adapter) = a.report();
        let t1 = by_tenant["t1"];
        assert_eq!(t1.in_tokens, 15);
        assert_eq!(t1.usd_micros, 150);
        assert_eq!(by_adapter["gpt"].usd_micros, 100);
        assert_eq!(by_adapter["claude"].usd_micros, 50);
    }

    #[test]
    fn unrelated_tenants_do_not_mix() {
        let a = Accountant::new();
        a.record(&Event {
            tenant: "t1".into(),
            adapter: "gpt".into(),
            in_tokens: 1,
            out_tokens: 1,
            usd_micros: 1,
        });
        let (by_tenant, _) = a.report();
        assert!(!by_tenant.contains_key("t2"));
    }
}

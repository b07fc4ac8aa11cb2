//! Prometheus metrics registry, exposed at `GET /metrics`.
//!
//! Carried as ambient observability even though the admin UI and log
//! shipping are explicit non-goals: `/metrics` is named directly in the
//! external interfaces and isn't part of either excluded surface.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub admissions_total: IntCounter,
    pub cache_outcomes_total: IntCounterVec,
    pub rate_limit_denials_total: IntCounter,
    pub quota_denials_total: IntCounter,
    pub abuse_blocks_total: IntCounter,
    pub upstream_outcomes_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let admissions_total =
            IntCounter::new("apexgate_admissions_total", "Requests that passed authentication").unwrap();
        let cache_outcomes_total = IntCounterVec::new(
            Opts::new("apexgate_cache_outcomes_total", "Cache lookup outcomes by kind"),
            &["outcome"],
        )
        .unwrap();
        let rate_limit_denials_total =
            IntCounter::new("apexgate_rate_limit_denials_total", "Requests denied by the rate limiter").unwrap();
        let quota_denials_total =
            IntCounter::new("apexgate_quota_denials_total", "Requests denied by the quota counter").unwrap();
        let abuse_blocks_total =
            IntCounter::new("apexgate_abuse_blocks_total", "Soft-blocks installed by the abuse detector").unwrap();
        let upstream_outcomes_total = IntCounterVec::new(
            Opts::new("apexgate_upstream_outcomes_total", "Upstream fetch outcomes by kind"),
            &["outcome"],
        )
        .unwrap();

        registry.register(Box::new(admissions_total.clone())).unwrap();
        registry.register(Box::new(cache_outcomes_total.clone())).unwrap();
        registry.register(Box::new(rate_limit_denials_total.clone())).unwrap();
        registry.register(Box::new(quota_denials_total.clone())).unwrap();
        registry.register(Box::new(abuse_blocks_total.clone())).unwrap();
        registry.register(Box::new(upstream_outcomes_total.clone())).unwrap();

        Arc::new(Self {
            registry,
            admissions_total,
            cache_outcomes_total,
            rate_limit_denials_total,
            quota_denials_total,
            abuse_blocks_total,
            upstream_outcomes_total,
        })
    }

    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode(&families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.admissions_total.inc();
        metrics.cache_outcomes_total.with_label_values(&["HIT"]).inc();
        let rendered = metrics.render();
        assert!(rendered.contains("apexgate_admissions_total"));
        assert!(rendered.contains("apexgate_cache_outcomes_total"));
    }
}

//! Prometheus metrics registry for the orchestrator.

use anyhow::{Context, Result};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Shared metrics handles. Cheap to clone (`Arc` around the registry, metric handles are
/// themselves cheap `Arc`-backed clones per the `prometheus` crate's own design).
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Count of probe outcomes, labeled by server and `ok`/`fail`.
    pub probe_outcomes_total: IntCounterVec,
    /// Count of restart attempts, labeled by server.
    pub restarts_total: IntCounterVec,
    /// Count of times `MAX_RESTARTS` was exceeded, labeled by server.
    pub restarts_exhausted_total: IntCounterVec,
    /// Current circuit breaker state per server (0=closed, 1=half_open, 2=open).
    pub breaker_state: IntGaugeVec,
    /// Count of rate-limiter rejections, labeled by server.
    pub rate_limited_total: IntCounterVec,
    /// Count of egress denials, labeled by host.
    pub egress_denied_total: IntCounterVec,
    /// Latency of health probes, labeled by server.
    pub probe_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Build a fresh registry with all orchestrator metrics registered.
    ///
    /// # Errors
    /// Returns an error if a metric fails to register (e.g. a duplicate name), which
    /// would indicate a programming error rather than a runtime condition.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let probe_outcomes_total = IntCounterVec::new(
            Opts::new("orchestrator_probe_outcomes_total", "health probe outcomes"),
            &["server", "outcome"],
        )
        .context("probe_outcomes_total")?;

        let restarts_total = IntCounterVec::new(
            Opts::new("orchestrator_restarts_total", "server restart attempts"),
            &["server"],
        )
        .context("restarts_total")?;

        let restarts_exhausted_total = IntCounterVec::new(
            Opts::new(
                "orchestrator_restarts_exhausted_total",
                "times a server exceeded its restart budget",
            ),
            &["server"],
        )
        .context("restarts_exhausted_total")?;

        let breaker_state = IntGaugeVec::new(
            Opts::new("orchestrator_breaker_state", "circuit breaker state per server"),
            &["server"],
        )
        .context("breaker_state")?;

        let rate_limited_total = IntCounterVec::new(
            Opts::new("orchestrator_rate_limited_total", "rate limiter rejections"),
            &["server"],
        )
        .context("rate_limited_total")?;

        let egress_denied_total = IntCounterVec::new(
            Opts::new("orchestrator_egress_denied_total", "denied outbound hosts"),
            &["host"],
        )
        .context("egress_denied_total")?;

        let probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "orchestrator_probe_duration_seconds",
                "health probe latency",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["server"],
        )
        .context("probe_duration_seconds")?;

        registry.register(Box::new(probe_outcomes_total.clone()))?;
        registry.register(Box::new(restarts_total.clone()))?;
        registry.register(Box::new(restarts_exhausted_total.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(egress_denied_total.clone()))?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            probe_outcomes_total,
            restarts_total,
            restarts_exhausted_total,
            breaker_state,
            rate_limited_total,
            egress_denied_total,
            probe_duration_seconds,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn export(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&metric_families)
            .context("failed to encode metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_error() {
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn export_reflects_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics
            .probe_outcomes_total
            .with_label_values(&["demo", "ok"])
            .inc();
        let text = metrics.export().unwrap();
        assert!(text.contains("orchestrator_probe_outcomes_total"));
        assert!(text.contains("demo"));
    }
}

//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for Tenantry:
//! - Tenant engine counts by lifecycle state
//! - Lifecycle operation counts and latencies (initialize, restart, reconfigure, remove)
//! - Configuration event counts by kind and outcome
//! - Availability request outcomes

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for Tenantry
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Registered tenant engines by lifecycle state
    pub tenant_engines: GaugeVec,

    /// Lifecycle operations by operation and outcome
    pub lifecycle_operations_total: CounterVec,
    /// Lifecycle operation duration
    pub lifecycle_duration_seconds: HistogramVec,

    /// Configuration events by kind and outcome
    pub config_events_total: CounterVec,

    /// Availability requests by outcome
    pub assure_requests_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tenant_engines = GaugeVec::new(
            Opts::new(
                "tenantry_tenant_engines",
                "Registered tenant engines by lifecycle state",
            ),
            &["state"],
        )?;

        let lifecycle_operations_total = CounterVec::new(
            Opts::new(
                "tenantry_lifecycle_operations_total",
                "Tenant engine lifecycle operations",
            ),
            &["operation", "outcome"],
        )?;

        let lifecycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tenantry_lifecycle_duration_seconds",
                "Tenant engine lifecycle operation duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            &["operation"],
        )?;

        let config_events_total = CounterVec::new(
            Opts::new(
                "tenantry_config_events_total",
                "Configuration store events processed",
            ),
            &["kind", "outcome"],
        )?;

        let assure_requests_total = CounterVec::new(
            Opts::new(
                "tenantry_assure_requests_total",
                "Tenant engine availability requests",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(tenant_engines.clone()))?;
        registry.register(Box::new(lifecycle_operations_total.clone()))?;
        registry.register(Box::new(lifecycle_duration_seconds.clone()))?;
        registry.register(Box::new(config_events_total.clone()))?;
        registry.register(Box::new(assure_requests_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            tenant_engines,
            lifecycle_operations_total,
            lifecycle_duration_seconds,
            config_events_total,
            assure_requests_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Move one engine from `from` to `to` in the per-state gauge.
    ///
    /// `None` on either side means the engine enters or leaves the registry.
    pub fn record_state_change(&self, from: Option<&str>, to: Option<&str>) {
        if from == to {
            return;
        }
        if let Some(from) = from {
            self.tenant_engines.with_label_values(&[from]).dec();
        }
        if let Some(to) = to {
            self.tenant_engines.with_label_values(&[to]).inc();
        }
    }

    /// Record a completed lifecycle operation
    pub fn record_operation(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.lifecycle_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.lifecycle_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Record a processed configuration event
    pub fn record_config_event(&self, kind: &str, outcome: &str) {
        self.config_events_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Record the outcome of an availability request
    pub fn record_assure(&self, outcome: &str) {
        self.assure_requests_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

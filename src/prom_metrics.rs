//! # Prometheus Metrics — Exposition for Container Orchestration
//!
//! Exposes hubsim operational metrics in the Prometheus text exposition format
//! for scraping by Prometheus, Grafana Agent, or any OpenMetrics-compatible collector.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hubsim_hubs_connected` | Gauge | — | Hub worker processes with a live `HUB_CONNECT_IND` |
//! | `hubsim_registrations_total` | Counter | `node_kind`, `outcome` | AP/RT registration attempts |
//! | `hubsim_heartbeats_total` | Counter | `node_kind`, `outcome` | Heartbeat attempts reported by workers |
//!
//! ## Integration
//!
//! The controller's dispatcher task updates these as `HUB_CONNECT_IND`,
//! `AP_REGISTER_RSP`/`RT_REGISTER_RSP` and `HEARTBEAT_STATS_RSP` messages
//! arrive off the uplink. The `/metrics` endpoint renders the current
//! registry state on each scrape.
//!
//! ## References
//!
//! - [OpenMetrics specification](https://openmetrics.io/)
//! - [Prometheus exposition format](https://prometheus.io/docs/instrumenting/exposition_formats/)

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Label set for per-node-kind, per-outcome counters (registrations, heartbeats).
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct OutcomeLabel {
    pub node_kind: String,
    pub outcome: String,
}

/// Thread-safe metrics registry for the hubsim controller.
///
/// All fields use atomic types and are safe to update from any thread or async task.
/// The `Family` type automatically creates per-label-set metric instances on first use.
pub struct Metrics {
    pub registry: Registry,
    pub hubs_connected: Gauge,
    pub registrations_total: Family<OutcomeLabel, Counter>,
    pub heartbeats_total: Family<OutcomeLabel, Counter>,
}

impl Metrics {
    /// Create a new metrics registry with all hubsim metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let hubs_connected = Gauge::default();
        registry.register(
            "hubsim_hubs_connected",
            "Number of hub worker processes currently connected",
            hubs_connected.clone(),
        );

        let registrations_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "hubsim_registrations_total",
            "AP/RT registration attempts by node kind and outcome",
            registrations_total.clone(),
        );

        let heartbeats_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "hubsim_heartbeats_total",
            "Heartbeat attempts reported by workers, by node kind and outcome",
            heartbeats_total.clone(),
        );

        Self {
            registry,
            hubs_connected,
            registrations_total,
            heartbeats_total,
        }
    }

    pub fn record_registration(&self, node_kind: &str, success: bool) {
        self.registrations_total
            .get_or_create(&OutcomeLabel {
                node_kind: node_kind.to_string(),
                outcome: if success { "success" } else { "failure" }.to_string(),
            })
            .inc();
    }

    pub fn record_heartbeat_stats(&self, node_kind: &str, success: u64, failure: u64) {
        self.heartbeats_total
            .get_or_create(&OutcomeLabel {
                node_kind: node_kind.to_string(),
                outcome: "success".to_string(),
            })
            .inc_by(success);
        self.heartbeats_total
            .get_or_create(&OutcomeLabel {
                node_kind: node_kind.to_string(),
                outcome: "failure".to_string(),
            })
            .inc_by(failure);
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).expect("encoding metrics should not fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_encode_returns_valid_text() {
        let m = Metrics::new();
        m.hubs_connected.set(5);
        m.record_registration("ap", true);

        let output = m.encode();
        assert!(output.contains("hubsim_hubs_connected"));
        assert!(output.contains("hubsim_registrations_total"));
    }

    #[test]
    fn metrics_default_values_are_zero() {
        let m = Metrics::new();
        let output = m.encode();
        assert!(output.contains("hubsim_hubs_connected"));
    }

    #[test]
    fn metrics_per_kind_counters_independent() {
        let m = Metrics::new();
        m.record_registration("ap", true);
        m.record_registration("rt", false);

        let output = m.encode();
        assert!(output.contains("node_kind=\"ap\""));
        assert!(output.contains("node_kind=\"rt\""));
    }

    #[test]
    fn heartbeat_stats_accumulate_by_amount() {
        let m = Metrics::new();
        m.record_heartbeat_stats("rt", 10, 2);
        let output = m.encode();
        assert!(output.contains("hubsim_heartbeats_total"));
    }
}

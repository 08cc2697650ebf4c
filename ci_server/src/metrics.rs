//! Prometheus metrics for build engine observability.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};

use crate::models::build::BuildStatus;

/// Install the Prometheus exporter. With an address, a scrape endpoint is
/// served there; without one the recorder is installed for in-process use.
pub fn init_metrics(listen: Option<SocketAddr>) {
    let mut builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Some(addr) = listen {
        builder = builder.with_http_listener(addr);
    }
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a build state transition.
pub fn build_status_changed(status: BuildStatus) {
    counter!("ci_builds_total", "status" => status.as_str()).increment(1);
}

/// Record a claim that lost the race to another worker.
pub fn claim_conflict() {
    counter!("ci_claim_conflicts_total").increment(1);
}

/// Record build duration.
pub fn build_duration(duration_ms: u64) {
    histogram!("ci_build_duration_ms").record(duration_ms as f64);
}

/// Record a plugin run.
pub fn plugin_duration(plugin: &str, success: bool, duration_ms: u64) {
    let outcome = if success { "success" } else { "failure" };
    histogram!("ci_plugin_duration_ms", "plugin" => plugin.to_string()).record(duration_ms as f64);
    counter!("ci_plugin_runs_total", "plugin" => plugin.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Set the number of builds currently executing on this worker.
pub fn active_builds(count: usize) {
    gauge!("ci_active_builds").set(count as f64);
}

/// Record persisted build errors.
pub fn error_recorded(plugin: &str, count: u64) {
    counter!("ci_build_errors_total", "plugin" => plugin.to_string()).increment(count);
}

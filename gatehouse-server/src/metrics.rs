//! Prometheus metrics collection for the Gatehouse server

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize all metric descriptions
pub fn init_metrics() {
    describe_counter!(
        "gatehouse_authorization_requests_total",
        "Total number of authorization requests"
    );
    describe_counter!("gatehouse_denials_total", "Denied requests by reason");
    describe_counter!("gatehouse_rule_evaluations_total", "Total number of rules evaluated");
    describe_counter!("gatehouse_errors_total", "Total number of errors");

    describe_histogram!(
        "gatehouse_authorization_latency_seconds",
        "Authorization request latency in seconds"
    );

    describe_gauge!("gatehouse_registered_types", "Number of types in the registry");
}

/// Record an authorization decision
pub fn record_authorization(decision: &str, reason: Option<&str>, rules: usize, latency_seconds: f64) {
    counter!("gatehouse_authorization_requests_total", 1, "decision" => decision.to_string());
    counter!("gatehouse_rule_evaluations_total", rules as u64);
    histogram!("gatehouse_authorization_latency_seconds", latency_seconds);

    if let Some(reason) = reason {
        counter!("gatehouse_denials_total", 1, "reason" => reason.to_string());
    }
}

/// Record an error
pub fn record_error(error_type: &str) {
    counter!("gatehouse_errors_total", 1, "type" => error_type.to_string());
}

/// Update the registry size gauge
pub fn update_registry_metrics(types: usize) {
    gauge!("gatehouse_registered_types", types as f64);
}

/// Storage for Prometheus handle
static PROMETHEUS_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

/// Initialize Prometheus exporter and return the handle
pub fn init_prometheus() -> anyhow::Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;
    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Failed to set Prometheus handle"))?;
    Ok(())
}

/// Get Prometheus metrics string
pub fn get_prometheus_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Prometheus metrics not initialized\n".to_string())
}

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const PHASE_INIT: &str = "init";
pub const PHASE_CALLBACK: &str = "callback";

/// Install the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;

    if METRICS_HANDLE.set(handle).is_err() {
        anyhow::bail!("metrics recorder already initialized");
    }
    Ok(())
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Count one handshake step. `outcome` is `success` or an error code.
pub fn record_handshake(phase: &'static str, provider: &str, outcome: &'static str) {
    counter!(
        "auth_handshakes_total",
        "phase" => phase,
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

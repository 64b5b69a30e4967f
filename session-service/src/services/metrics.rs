//! Prometheus export and session counters.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use super::error::SessionError;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const SESSION_OPERATIONS_TOTAL: &str = "session_operations_total";

/// Install the Prometheus recorder. Calling it again is a no-op.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    // A concurrent caller may have won; its handle renders the same recorder.
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Count one session operation, labelled by its outcome.
pub fn record_session_operation<T>(operation: &'static str, result: &Result<T, SessionError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(err) => err.kind().as_str(),
    };

    counter!(
        SESSION_OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

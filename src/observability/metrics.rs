//! Prometheus counters for the retention sweep.
//!
//! Recording functions are always available and compile to no-ops without
//! the `metrics` feature.

#[cfg(feature = "metrics")]
use metrics::counter;
#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::{config::MetricsConfig, models::TerminalState};

/// Install the global recorder and serve `/metrics` on the configured
/// address. Must be called from within a Tokio runtime.
#[cfg(feature = "metrics")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: std::net::SocketAddr = config
        .listen_address
        .parse()
        .map_err(|e| MetricsError::Setup(format!("Invalid listen address: {}", e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without the `metrics` feature).
#[cfg(not(feature = "metrics"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Record jobs deleted by one retention branch.
pub fn record_retention_deletion(state: TerminalState, count: u64) {
    #[cfg(feature = "metrics")]
    {
        counter!("retention_deletions_total", "state" => state.as_str()).increment(count);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (state, count);
    }
}

/// Record a retention branch that returned an error.
pub fn record_retention_failure(state: TerminalState) {
    #[cfg(feature = "metrics")]
    {
        counter!("retention_branch_failures_total", "state" => state.as_str()).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = state;
    }
}

/// Metrics setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "metrics")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

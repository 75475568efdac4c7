//! Prometheus metrics for the filter chain.
//!
//! Metrics are exposed via a dedicated HTTP listener (`METRICS_PORT`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `wafflehaus_filter_decisions_total` - What each filter did with a request
//!   (labels: filter, outcome)
//! - `wafflehaus_callbacks_total` - Nova/Neutron callbacks (labels: service, status)
//!
//! ## Histograms
//! - `wafflehaus_upstream_duration_seconds` - Upstream round trip (labels: method, status)
//!
//! Recording without an installed exporter is a no-op, so filters and tests
//! call these freely.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const FILTER_DECISIONS_TOTAL: &str = "wafflehaus_filter_decisions_total";
    pub const CALLBACKS_TOTAL: &str = "wafflehaus_callbacks_total";
    pub const UPSTREAM_DURATION_SECONDS: &str = "wafflehaus_upstream_duration_seconds";
}

/// Filter outcome labels.
pub mod outcome {
    /// Filter disabled or request not matched.
    pub const SKIPPED: &str = "skipped";
    /// Request or response forwarded unchanged after inspection.
    pub const PASSED: &str = "passed";
    /// Body rewritten.
    pub const REWRITTEN: &str = "rewritten";
    /// Short-circuited with a client error.
    pub const REJECTED: &str = "rejected";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (port in use,
/// recorder already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::FILTER_DECISIONS_TOTAL,
        "Requests seen by each filter, by outcome"
    );
    describe_counter!(
        names::CALLBACKS_TOTAL,
        "Outbound Nova and Neutron callbacks, by result"
    );
    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Upstream Neutron request duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record what a filter decided for one request.
pub fn record_filter_decision(filter: &'static str, outcome: &'static str) {
    counter!(names::FILTER_DECISIONS_TOTAL, "filter" => filter, "outcome" => outcome).increment(1);
}

/// Record a Nova or Neutron callback result (`success` or `error`).
pub fn record_callback(service: &'static str, status: &'static str) {
    counter!(names::CALLBACKS_TOTAL, "service" => service, "status" => status).increment(1);
}

/// Record an upstream round trip.
pub fn record_upstream_duration(method: &str, status: u16, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

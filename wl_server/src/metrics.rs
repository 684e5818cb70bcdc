//! Prometheus metrics for the ledger server.
//!
//! Metrics are exposed in Prometheus text format on a separate listener when
//! `METRICS_BIND` is set. Without an installed exporter every recording call
//! below is a no-op.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use wl_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::ledger_operation("wager", "ok", 3.5);
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// `path` should be the matched route template to keep label cardinality bounded.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Record one ledger operation with its outcome and duration.
pub fn ledger_operation(operation: &str, outcome: &str, duration_ms: f64) {
    metrics::counter!("ledger_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!("ledger_operation_duration_ms",
        "operation" => operation.to_string()
    )
    .record(duration_ms);
}

/// Add swept idempotency keys to the running total.
pub fn idempotency_keys_swept(count: u64) {
    metrics::counter!("idempotency_keys_swept_total").increment(count);
}

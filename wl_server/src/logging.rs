//! Structured logging configuration.
//!
//! Sets up `tracing` for the server. Records emitted by the ledger library
//! through the `log` facade are forwarded into the same subscriber.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Operations slower than this are logged at warn level
pub const SLOW_OPERATION_MS: u64 = 1000;

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use wl_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log a completed ledger operation
///
/// # Arguments
///
/// * `operation` - Operation name (purchase, wager, redeem, ...)
/// * `user_id` - User the operation ran for
/// * `status` - Outcome label, `ok` or an error kind
/// * `duration_ms` - Duration in milliseconds
///
/// # Example
///
/// ```
/// use wl_server::logging::log_ledger_operation;
///
/// log_ledger_operation("wager", 42, "insufficient_funds", 12);
/// ```
pub fn log_ledger_operation(operation: &str, user_id: i64, status: &str, duration_ms: u64) {
    if duration_ms > SLOW_OPERATION_MS {
        tracing::warn!(
            operation = operation,
            user_id = user_id,
            status = status,
            duration_ms = duration_ms,
            "PERFORMANCE: Slow ledger operation"
        );
    } else {
        tracing::info!(
            operation = operation,
            user_id = user_id,
            status = status,
            duration_ms = duration_ms,
            "Ledger operation completed"
        );
    }
}

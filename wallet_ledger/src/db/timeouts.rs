//! Deadline helpers for ledger operations
//!
//! Wraps lock waits and store transactions so no operation blocks indefinitely.
//! When a deadline fires, the wrapped future is dropped; an open transaction
//! inside it is rolled back by its own drop.

use crate::ledger::{LedgerError, LedgerResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for a single statement (5 seconds)
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a whole ledger transaction (10 seconds)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute a ledger operation with timeout
///
/// # Arguments
///
/// * `duration` - Timeout duration
/// * `future` - Async operation to execute
///
/// # Returns
///
/// * `LedgerResult<T>` - Result of the operation or [`LedgerError::Timeout`]
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout(duration)),
    }
}

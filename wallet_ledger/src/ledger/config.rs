//! Ledger engine configuration.

use super::errors::{LedgerError, LedgerResult};
use super::locks::DEFAULT_LOCK_TABLE_CAPACITY;
use crate::db::DEFAULT_TRANSACTION_TIMEOUT;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Page size used when the caller does not pass a limit
    pub default_page_limit: usize,

    /// Upper bound that larger limits are clamped to
    pub max_page_limit: usize,

    /// Deadline for lock acquisition plus the whole store transaction
    pub transaction_timeout: Duration,

    /// How long idempotency records are kept before the sweep may delete them
    pub idempotency_retention: chrono::Duration,

    /// Longest accepted idempotency key, in characters
    pub max_idempotency_key_len: usize,

    /// Lock handles kept before idle ones are pruned
    pub lock_table_capacity: usize,
}

impl LedgerConfig {
    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `LEDGER_DEFAULT_PAGE_LIMIT` (default: 20)
    /// - `LEDGER_MAX_PAGE_LIMIT` (default: 100)
    /// - `LEDGER_TRANSACTION_TIMEOUT_MS` (default: 10000)
    /// - `IDEMPOTENCY_RETENTION_HOURS` (default: 24)
    /// - `IDEMPOTENCY_KEY_MAX_LEN` (default: 255)
    /// - `LOCK_TABLE_CAPACITY` (default: 10000)
    pub fn from_env() -> LedgerResult<Self> {
        let defaults = Self::default();
        let config = Self {
            default_page_limit: parse_env_or("LEDGER_DEFAULT_PAGE_LIMIT", defaults.default_page_limit),
            max_page_limit: parse_env_or("LEDGER_MAX_PAGE_LIMIT", defaults.max_page_limit),
            transaction_timeout: std::env::var("LEDGER_TRANSACTION_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.transaction_timeout),
            idempotency_retention: retention_from_hours(parse_env_or(
                "IDEMPOTENCY_RETENTION_HOURS",
                defaults.idempotency_retention.num_hours(),
            ))?,
            max_idempotency_key_len: parse_env_or(
                "IDEMPOTENCY_KEY_MAX_LEN",
                defaults.max_idempotency_key_len,
            ),
            lock_table_capacity: parse_env_or("LOCK_TABLE_CAPACITY", defaults.lock_table_capacity),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.max_page_limit == 0 {
            return Err(LedgerError::Configuration(
                "LEDGER_MAX_PAGE_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(LedgerError::Configuration(format!(
                "LEDGER_DEFAULT_PAGE_LIMIT must be between 1 and {}",
                self.max_page_limit
            )));
        }
        if self.transaction_timeout.is_zero() {
            return Err(LedgerError::Configuration(
                "LEDGER_TRANSACTION_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        if self.idempotency_retention <= chrono::Duration::zero() {
            return Err(LedgerError::Configuration(
                "IDEMPOTENCY_RETENTION_HOURS must be greater than 0".to_string(),
            ));
        }
        if self.max_idempotency_key_len == 0 {
            return Err(LedgerError::Configuration(
                "IDEMPOTENCY_KEY_MAX_LEN must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_page_limit: 20,
            max_page_limit: 100,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            idempotency_retention: chrono::Duration::hours(24),
            max_idempotency_key_len: 255,
            lock_table_capacity: DEFAULT_LOCK_TABLE_CAPACITY,
        }
    }
}

/// Retention window of `hours`; counts beyond what `chrono` can represent are rejected
fn retention_from_hours(hours: i64) -> LedgerResult<chrono::Duration> {
    chrono::Duration::try_hours(hours).ok_or_else(|| {
        LedgerError::Configuration(format!(
            "IDEMPOTENCY_RETENTION_HOURS is out of range: {hours}"
        ))
    })
}

/// Helper to parse environment variable with default fallback
pub fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

//! Database configuration module.
//!
//! Provides configuration structures for database connection management.

use crate::ledger::{LedgerError, LedgerResult, parse_env_or};
use std::env;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,

    /// Per-transaction statement and lock timeout in milliseconds
    pub statement_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `DATABASE_URL`: PostgreSQL connection string (required)
    /// - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 25)
    /// - `DB_MIN_CONNECTIONS`: Minimum pool size (default: 5)
    /// - `DB_CONNECTION_TIMEOUT`: Connection timeout in seconds (default: 10)
    /// - `DB_IDLE_TIMEOUT`: Idle timeout in seconds (default: 600)
    /// - `DB_MAX_LIFETIME`: Max lifetime in seconds (default: 300)
    /// - `DB_STATEMENT_TIMEOUT_MS`: Statement timeout in milliseconds (default: 5000)
    pub fn from_env() -> LedgerResult<Self> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            LedgerError::Configuration("DATABASE_URL must be set".to_string())
        })?;
        Ok(Self::with_url(database_url))
    }

    /// Configuration for `database_url` with every other knob read from the environment
    pub fn with_url(database_url: String) -> Self {
        let defaults = Self::development();
        Self {
            database_url,
            max_connections: parse_env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connection_timeout_secs: parse_env_or(
                "DB_CONNECTION_TIMEOUT",
                defaults.connection_timeout_secs,
            ),
            idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT", defaults.idle_timeout_secs),
            max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME", defaults.max_lifetime_secs),
            statement_timeout_ms: parse_env_or(
                "DB_STATEMENT_TIMEOUT_MS",
                defaults.statement_timeout_ms,
            ),
        }
    }

    /// Create a default configuration for development
    ///
    /// Uses `postgres://postgres@localhost/wallet_ledger` as the database URL
    pub fn development() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/wallet_ledger".to_string(),
            max_connections: 25,
            min_connections: 5,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 300,
            statement_timeout_ms: 5_000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}

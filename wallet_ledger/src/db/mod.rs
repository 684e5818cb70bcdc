//! Storage for the ledger.
//!
//! This module manages the PostgreSQL connection pool and provides the two
//! interchangeable [`LedgerStore`] implementations.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::ledger::{LedgerError, LedgerResult};

pub mod config;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod timeouts;

pub use config::DatabaseConfig;
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use store::{LedgerStore, LedgerTx};
pub use timeouts::{DEFAULT_STATEMENT_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT, with_timeout};

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    statement_timeout: Duration,
}

impl Database {
    /// Create a new database connection pool
    ///
    /// # Arguments
    ///
    /// * `config` - Database configuration
    ///
    /// # Returns
    ///
    /// * `LedgerResult<Database>` - Database instance or error
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wallet_ledger::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), wallet_ledger::LedgerError> {
    ///     let config = DatabaseConfig::from_env()?;
    ///     let db = Database::new(&config).await?;
    ///     db.migrate().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            pool,
            statement_timeout: Duration::from_millis(config.statement_timeout_ms),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("migration failed: {e}")))
    }

    /// Ledger store sharing this pool
    pub fn ledger_store(&self) -> PgLedgerStore {
        PgLedgerStore::new(self.pool.clone(), self.statement_timeout)
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL instance"]
    async fn test_database_connection() {
        let config = DatabaseConfig::from_env().expect("DATABASE_URL must be set");
        let db = Database::new(&config)
            .await
            .expect("Failed to connect to database");
        db.migrate().await.expect("Migrations failed");
        db.health_check().await.expect("Health check failed");
        db.close().await;
    }
}

//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};
use wallet_ledger::{DatabaseConfig, LedgerConfig, ledger::parse_env_or};

/// Address used when neither `--bind` nor `SERVER_BIND` is given
pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

/// Default idempotency sweep interval in seconds (1 hour)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Where ledger data lives
    pub storage: StorageBackend,
    /// Engine configuration
    pub ledger: LedgerConfig,
    /// JSON package catalog; the built-in catalog is used when absent
    pub catalog_path: Option<PathBuf>,
    /// Time between idempotency sweeps
    pub sweep_interval: Duration,
    /// Prometheus listener address; metrics are disabled when absent
    pub metrics_bind: Option<SocketAddr>,
}

/// Storage backend selection
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// PostgreSQL through a connection pool
    Postgres(DatabaseConfig),
    /// Process-local store, lost on exit
    Memory {
        /// Usernames created at startup
        seed_users: Vec<String>,
    },
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `in_memory` - Use the in-memory store instead of PostgreSQL
    ///
    /// # Returns
    ///
    /// * `Result<ServerConfig, ConfigError>` - Loaded configuration or error
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        in_memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr_var("SERVER_BIND")?.unwrap_or(DEFAULT_BIND),
        };

        let storage = if in_memory {
            StorageBackend::Memory {
                seed_users: parse_list(&std::env::var("SEED_USERS").unwrap_or_default()),
            }
        } else {
            let database_url = database_url_override
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .ok_or_else(|| ConfigError::MissingRequired {
                    var: "DATABASE_URL".to_string(),
                    hint: "Pass --db-url, or --in-memory to run without PostgreSQL".to_string(),
                })?;
            StorageBackend::Postgres(DatabaseConfig::with_url(database_url))
        };

        let ledger =
            LedgerConfig::from_env().map_err(|e| ConfigError::Ledger(e.to_string()))?;

        let catalog_path = std::env::var("PACKAGE_CATALOG_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let sweep_interval = Duration::from_secs(parse_env_or(
            "IDEMPOTENCY_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        ));

        Ok(ServerConfig {
            bind,
            storage,
            ledger,
            catalog_path,
            sweep_interval,
            metrics_bind: parse_addr_var("METRICS_BIND")?,
        })
    }

    /// Validate configuration after loading
    ///
    /// # Returns
    ///
    /// * `Result<(), ConfigError>` - Success or validation error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "IDEMPOTENCY_SWEEP_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("Must differ from the server bind address ({})", self.bind),
            });
        }

        match &self.storage {
            StorageBackend::Postgres(database) => {
                if database.max_connections == 0 {
                    return Err(ConfigError::Invalid {
                        var: "DB_MAX_CONNECTIONS".to_string(),
                        reason: "Must be greater than 0".to_string(),
                    });
                }

                if database.min_connections > database.max_connections {
                    return Err(ConfigError::Invalid {
                        var: "DB_MIN_CONNECTIONS".to_string(),
                        reason: format!(
                            "Cannot exceed max connections ({})",
                            database.max_connections
                        ),
                    });
                }

                if database.statement_timeout_ms == 0 {
                    return Err(ConfigError::Invalid {
                        var: "DB_STATEMENT_TIMEOUT_MS".to_string(),
                        reason: "Must be greater than 0".to_string(),
                    });
                }
            }
            StorageBackend::Memory { seed_users } => {
                let mut seen = HashSet::new();
                if let Some(duplicate) = seed_users.iter().find(|name| !seen.insert(*name)) {
                    return Err(ConfigError::Invalid {
                        var: "SEED_USERS".to_string(),
                        reason: format!("Duplicate username '{duplicate}'"),
                    });
                }
            }
        }

        self.ledger
            .validate()
            .map_err(|e| ConfigError::Ledger(e.to_string()))
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("Invalid ledger configuration: {0}")]
    Ledger(String),
}

/// Socket address from `var`; unset or empty is `None`, unparsable is an error
fn parse_addr_var(var: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid {
                    var: var.to_string(),
                    reason: format!("'{value}' is not an IP:PORT address"),
                })
        }
        _ => Ok(None),
    }
}

/// Comma-separated list with blanks dropped
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

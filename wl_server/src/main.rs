//! Wallet ledger server.
//!
//! Serves the ledger engine over HTTP, backed by PostgreSQL or by the
//! in-memory store, and sweeps expired idempotency keys in the background.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Error};
use pico_args::Arguments;
use tokio::sync::watch;
use wallet_ledger::{
    Database, IdempotencySweeper, LedgerEngine, LedgerStore, MemoryLedgerStore, PackageCatalog,
};
use wl_server::{
    api,
    config::{ServerConfig, StorageBackend},
    logging, metrics,
};

const HELP: &str = "\
Run the wallet ledger server

USAGE:
  wl_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --in-memory              Keep the ledger in process memory instead of PostgreSQL
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND                       Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL                      PostgreSQL connection string
  PACKAGE_CATALOG_PATH              JSON package catalog (built-in catalog if unset)
  SEED_USERS                        Comma-separated usernames created in --in-memory mode
  METRICS_BIND                      Prometheus listener address (metrics off if unset)
  IDEMPOTENCY_SWEEP_INTERVAL_SECS   Seconds between idempotency sweeps [default: 3600]
  IDEMPOTENCY_RETENTION_HOURS       Age at which idempotency keys expire [default: 24]
  RUST_LOG                          Log filter [default: info,sqlx=warn,hyper=warn]
  (See .env.example for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs
            .opt_value_from_str("--bind")
            .context("Invalid --bind address")?,
        database_url: pargs
            .opt_value_from_str("--db-url")
            .context("Invalid --db-url")?,
        in_memory: pargs.contains("--in-memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url, args.in_memory)?;
    config.validate()?;

    if let Some(metrics_bind) = config.metrics_bind {
        metrics::init_metrics(metrics_bind).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!("Prometheus metrics listening on http://{}/metrics", metrics_bind);
    }

    let catalog = match &config.catalog_path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read package catalog {}", path.display()))?;
            PackageCatalog::from_json(&json)?
        }
        None => PackageCatalog::standard(),
    };
    tracing::info!("Loaded {} package(s)", catalog.len());

    let (store, database): (Arc<dyn LedgerStore>, Option<Database>) = match &config.storage {
        StorageBackend::Postgres(db_config) => {
            tracing::info!("Connecting to database");
            let db = Database::new(db_config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Database connected and migrated");
            let store: Arc<dyn LedgerStore> = Arc::new(db.ledger_store());
            (store, Some(db))
        }
        StorageBackend::Memory { seed_users } => {
            tracing::warn!("Using in-memory store; ledger data is lost on exit");
            let store = MemoryLedgerStore::new();
            for username in seed_users {
                let user = store.create_user(username);
                tracing::info!("Seeded user {} with ID {}", user.username, user.id);
            }
            let store: Arc<dyn LedgerStore> = Arc::new(store);
            (store, None)
        }
    };

    let engine = Arc::new(LedgerEngine::new(
        store.clone(),
        Arc::new(catalog),
        config.ledger.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = IdempotencySweeper::new(
        store,
        config.ledger.idempotency_retention,
        config.sweep_interval,
    )
    .on_sweep(metrics::idempotency_keys_swept)
    .spawn(shutdown_rx);

    let app = api::create_router(api::AppState::new(engine));

    tracing::info!("Starting HTTP server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down server...");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!("Idempotency sweeper task failed: {}", e);
    }

    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}

//! HTTP API for the wallet ledger.
//!
//! # Endpoints
//!
//! ```text
//! GET  /health                     - Store health (200 or 503)
//! GET  /packages                   - Package catalog
//! GET  /users/{id}                 - User with balances and lifetime totals
//! GET  /users/{id}/transactions    - Paginated history (?cursor&limit&type&currency)
//! POST /users/{id}/purchase        - Credit a package
//! POST /users/{id}/wager           - Stake and payout legs
//! POST /users/{id}/redeem          - Redeem sweeps
//! ```
//!
//! Errors use the body `{"error": "...", "kind": "..."}`; see [`errors`].
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wallet_ledger::{LedgerConfig, LedgerEngine, MemoryLedgerStore, PackageCatalog};
//! use wl_server::api::{AppState, create_router};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryLedgerStore::new());
//! let engine = LedgerEngine::new(
//!     store.clone(),
//!     Arc::new(PackageCatalog::standard()),
//!     LedgerConfig::default(),
//! );
//!
//! let app = create_router(AppState::new(Arc::new(engine)));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod request_id;
pub mod wallet;

use axum::{
    Router,
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use wallet_ledger::{LedgerEngine, LedgerStore};

use crate::metrics;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LedgerEngine>,
    pub store: Arc<dyn LedgerStore>,
}

impl AppState {
    /// State backed by the engine's own store
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        let store = engine.store().clone();
        Self { engine, store }
    }
}

/// Create the API router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/users/{user_id}", get(wallet::get_user))
        .route(
            "/users/{user_id}/transactions",
            get(wallet::list_transactions),
        )
        .route("/users/{user_id}/purchase", post(wallet::purchase))
        .route("/users/{user_id}/wager", post(wallet::wager))
        .route("/users/{user_id}/redeem", post(wallet::redeem));

    Router::new()
        .route("/health", get(health_check))
        .route("/packages", get(wallet::list_packages))
        .merge(user_routes)
        .route_layer(axum::middleware::from_fn(track_http_metrics))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Count requests by method, route template and status.
async fn track_http_metrics(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;
    metrics::http_requests_total(method.as_str(), &path, response.status().as_u16());
    response
}

/// Health check endpoint for monitoring and load balancers.
///
/// # Response
///
/// Returns `200 OK` when the store answers, `503 Service Unavailable` otherwise.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","version":"1.0.0","timestamp":"2026-10-17T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "error": "database unavailable",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}

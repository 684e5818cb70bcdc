//! Wallet API handlers.
//!
//! Thin adapters between HTTP and the ledger engine: they parse path, query
//! and body, call one engine operation, and record metrics for it.
//!
//! # Examples
//!
//! Buy a package:
//! ```bash
//! curl -X POST http://localhost:8080/users/1/purchase \
//!   -H "Content-Type: application/json" \
//!   -d '{"package_code": "starter_10k", "idempotency_key": "buy-1"}'
//! ```
//!
//! Page through history:
//! ```bash
//! curl "http://localhost:8080/users/1/transactions?limit=10&currency=GOLD"
//! ```

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use serde::Deserialize;
use std::{future::Future, time::Instant};
use wallet_ledger::{
    AccountView, Currency, EntryFilter, EntryKind, EntryPage, EntryQuery, LedgerEntry,
    LedgerResult, Package, UserId, WagerAmounts,
};

use super::AppState;
use super::errors::ApiError;
use crate::{logging, metrics};

/// Query string of the history endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TransactionsParams {
    pub cursor: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default)]
    pub package_code: String,
    #[serde(default)]
    pub idempotency_key: String,
}

#[derive(Debug, Deserialize)]
pub struct WagerRequest {
    #[serde(flatten)]
    pub amounts: WagerAmounts,
    #[serde(default)]
    pub idempotency_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    #[serde(default)]
    pub amount_sweeps: i64,
    #[serde(default)]
    pub idempotency_key: String,
}

/// List the package catalog ordered by code.
pub async fn list_packages(State(state): State<AppState>) -> Json<Vec<Package>> {
    Json(state.engine.catalog().iter().cloned().collect())
}

/// Get a user with balances and lifetime totals.
///
/// # Errors
///
/// - `400 Bad Request`: Non-numeric user id
/// - `404 Not Found`: Unknown user
pub async fn get_user(
    State(state): State<AppState>,
    user_id: Result<Path<UserId>, PathRejection>,
) -> Result<Json<AccountView>, ApiError> {
    let user_id = parse_user_id(user_id)?;
    let view = state.engine.get_user_with_balances(user_id).await?;
    Ok(Json(view))
}

/// List one page of a user's ledger entries, newest first.
///
/// Pass the returned `next_cursor` back as `cursor` to continue.
///
/// # Errors
///
/// - `400 Bad Request`: Bad limit, type, currency or cursor
/// - `404 Not Found`: Unknown user
pub async fn list_transactions(
    State(state): State<AppState>,
    user_id: Result<Path<UserId>, PathRejection>,
    params: Result<Query<TransactionsParams>, QueryRejection>,
) -> Result<Json<EntryPage>, ApiError> {
    let user_id = parse_user_id(user_id)?;
    let Query(params) = params.map_err(|_| ApiError::bad_request("invalid query string"))?;
    let query = entry_query(params)?;

    let page = state.engine.list_entries(user_id, query).await?;
    Ok(Json(page))
}

/// Credit a catalog package. Responds with every entry written.
///
/// # Errors
///
/// - `400 Bad Request`: Missing package code or idempotency key
/// - `404 Not Found`: Unknown user
/// - `422 Unprocessable Entity`: Unknown package code
pub async fn purchase(
    State(state): State<AppState>,
    user_id: Result<Path<UserId>, PathRejection>,
    body: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let user_id = parse_user_id(user_id)?;
    let Json(request) = parse_body(body)?;

    if request.package_code.trim().is_empty() {
        return Err(ApiError::bad_request("package_code is required"));
    }
    require_idempotency_key(&request.idempotency_key)?;

    let entries = observe(
        "purchase",
        user_id,
        state
            .engine
            .purchase(user_id, &request.package_code, &request.idempotency_key),
    )
    .await?;
    Ok(Json(entries))
}

/// Apply a wager. Responds with every entry written, stakes first.
///
/// # Errors
///
/// - `400 Bad Request`: Negative amounts, all amounts zero, missing key
/// - `404 Not Found`: Unknown user
/// - `409 Conflict`: A stake exceeds the balance at that point
pub async fn wager(
    State(state): State<AppState>,
    user_id: Result<Path<UserId>, PathRejection>,
    body: Result<Json<WagerRequest>, JsonRejection>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let user_id = parse_user_id(user_id)?;
    let Json(request) = parse_body(body)?;
    require_idempotency_key(&request.idempotency_key)?;

    let entries = observe(
        "wager",
        user_id,
        state
            .engine
            .wager(user_id, request.amounts, &request.idempotency_key),
    )
    .await?;
    Ok(Json(entries))
}

/// Redeem sweeps. Responds with the single entry written.
///
/// # Errors
///
/// - `400 Bad Request`: Non-positive amount, missing key
/// - `404 Not Found`: Unknown user
/// - `409 Conflict`: Amount exceeds the sweeps balance
pub async fn redeem(
    State(state): State<AppState>,
    user_id: Result<Path<UserId>, PathRejection>,
    body: Result<Json<RedeemRequest>, JsonRejection>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let user_id = parse_user_id(user_id)?;
    let Json(request) = parse_body(body)?;
    require_idempotency_key(&request.idempotency_key)?;

    let entry = observe(
        "redeem",
        user_id,
        state
            .engine
            .redeem(user_id, request.amount_sweeps, &request.idempotency_key),
    )
    .await?;
    Ok(Json(entry))
}

fn parse_user_id(user_id: Result<Path<UserId>, PathRejection>) -> Result<UserId, ApiError> {
    match user_id {
        Ok(Path(id)) if id > 0 => Ok(id),
        _ => Err(ApiError::bad_request("invalid user id")),
    }
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<Json<T>, ApiError> {
    body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected request body");
        ApiError::bad_request("invalid request body")
    })
}

fn require_idempotency_key(key: &str) -> Result<(), ApiError> {
    if key.trim().is_empty() {
        return Err(ApiError::bad_request("idempotency_key is required"));
    }
    Ok(())
}

/// Turn raw query parameters into an engine query
fn entry_query(params: TransactionsParams) -> Result<EntryQuery, ApiError> {
    let limit = params
        .limit
        .filter(|limit| !limit.is_empty())
        .map(|limit| limit.parse::<i64>())
        .transpose()
        .map_err(|_| ApiError::bad_request("invalid limit: must be a number"))?;

    let kind = params
        .kind
        .filter(|kind| !kind.is_empty())
        .map(|kind| kind.to_ascii_uppercase().parse::<EntryKind>())
        .transpose()
        .map_err(|_| ApiError::bad_request("invalid transaction type"))?;

    let currency = params
        .currency
        .filter(|currency| !currency.is_empty())
        .map(|currency| currency.to_ascii_uppercase().parse::<Currency>())
        .transpose()
        .map_err(|_| ApiError::bad_request("invalid currency: must be GOLD or SWEEPS"))?;

    Ok(EntryQuery {
        cursor: params.cursor,
        limit,
        filter: EntryFilter { kind, currency },
    })
}

/// Run a mutation, then log and count it by outcome
async fn observe<T>(
    operation: &'static str,
    user_id: UserId,
    call: impl Future<Output = LedgerResult<T>>,
) -> LedgerResult<T> {
    let started = Instant::now();
    let result = call.await;
    let elapsed = started.elapsed();

    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.kind().as_str(),
    };
    metrics::ledger_operation(operation, outcome, elapsed.as_secs_f64() * 1000.0);
    logging::log_ledger_operation(
        operation,
        user_id,
        outcome,
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    );

    result
}

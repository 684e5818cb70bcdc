//! Error responses for the HTTP API.
//!
//! Every failure leaves the server as `{"error": "...", "kind": "..."}` with a
//! status chosen by the error's taxonomy kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use wallet_ledger::{ErrorKind, LedgerError};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

/// Errors returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Failure reported by the ledger engine
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Request rejected before reaching the engine
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    /// Taxonomy kind; request-shape errors count as invalid input
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Ledger(err) => err.kind(),
            ApiError::BadRequest(_) => ErrorKind::InvalidInput,
        }
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.kind())
    }
}

/// HTTP status for each error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InsufficientFunds => StatusCode::CONFLICT,
        ErrorKind::InvalidPackage => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match &self {
            ApiError::Ledger(err) => {
                if kind == ErrorKind::Internal {
                    tracing::error!(error = %err, "Ledger operation failed");
                }
                err.client_message()
            }
            ApiError::BadRequest(message) => message.clone(),
        };

        let body = ErrorResponse {
            error: message,
            kind: kind.as_str(),
        };
        (status_for(kind), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wallet_ledger::Currency;

    #[test]
    fn test_status_mapping_is_distinct_per_kind() {
        let cases = [
            (LedgerError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::InvalidCursor("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::UserNotFound(1), StatusCode::NOT_FOUND),
            (
                LedgerError::InsufficientFunds {
                    currency: Currency::Gold,
                    available: 0,
                    required: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                LedgerError::InvalidPackage("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LedgerError::Timeout(Duration::from_secs(1)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_bad_request_is_invalid_input() {
        let err = ApiError::bad_request("invalid user id");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "invalid user id");
    }

    #[test]
    fn test_internal_response_hides_details() {
        let err = ApiError::from(LedgerError::Storage("duplicate entry id 7".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

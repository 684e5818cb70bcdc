//! Ledger error types.

use super::models::{Currency, UserId};
use std::time::Duration;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or out-of-domain caller argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Package code not in the catalog
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// Debit would take the balance below zero
    #[error("Insufficient {currency} funds: available {available}, required {required}")]
    InsufficientFunds {
        currency: Currency,
        available: i64,
        required: i64,
    },

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Pagination cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Running balance would not fit in 64 bits
    #[error("Balance overflow for {0}")]
    BalanceOverflow(Currency),

    /// Lock wait or transaction exceeded its deadline
    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store returned data that violates a ledger invariant
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Closed error taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    InvalidPackage,
    InsufficientFunds,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidPackage => "invalid_package",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl LedgerError {
    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidInput(_)
            | LedgerError::InvalidCursor(_)
            | LedgerError::BalanceOverflow(_) => ErrorKind::InvalidInput,
            LedgerError::InvalidPackage(_) => ErrorKind::InvalidPackage,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::UserNotFound(_) => ErrorKind::NotFound,
            LedgerError::Timeout(_)
            | LedgerError::Database(_)
            | LedgerError::Storage(_)
            | LedgerError::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Internal errors are collapsed into a generic message so SQL details and
    /// storage state never reach the caller; user IDs are redacted.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            ErrorKind::NotFound => "User not found".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

//! # Wallet Ledger
//!
//! An append-only ledger for a dual-currency (GOLD / SWEEPS) wallet.
//!
//! Every balance-affecting event is recorded as an immutable entry, and
//! balances are derived solely from the entry log: the balance of a
//! (user, currency) pair is the `balance_after` of its newest entry.
//!
//! ## Core Modules
//!
//! - [`ledger`]: domain model, [`LedgerEngine`], lock table, cursor codec,
//!   package catalog and idempotency sweeper
//! - [`db`]: storage contract, PostgreSQL and in-memory stores, pool configuration
//!
//! ## Guarantees
//!
//! - Purchases, wagers and redemptions are idempotent per (key, user): a
//!   retried request returns the originally recorded entries and writes nothing
//! - Multi-leg operations are atomic; a failed leg leaves no entries behind
//! - Debits never take a balance below zero, even with concurrent writers
//!   across processes sharing one database
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use wallet_ledger::{LedgerConfig, LedgerEngine, MemoryLedgerStore, PackageCatalog};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), wallet_ledger::LedgerError> {
//! let store = MemoryLedgerStore::new();
//! let user = store.create_user("alice");
//! let engine = LedgerEngine::new(
//!     Arc::new(store),
//!     Arc::new(PackageCatalog::standard()),
//!     LedgerConfig::default(),
//! );
//!
//! engine.purchase(user.id, "starter_10k", "order-1").await?;
//! let view = engine.get_user_with_balances(user.id).await?;
//! assert_eq!(view.balances.gold, 10_000);
//! # Ok(())
//! # }
//! ```

/// Storage contract and implementations.
pub mod db;

/// Domain model and transaction engine.
pub mod ledger;

pub use db::{Database, DatabaseConfig, LedgerStore, LedgerTx, MemoryLedgerStore, PgLedgerStore};
pub use ledger::{
    AccountView, Currency, Cursor, EntryFilter, EntryKind, EntryPage, EntryQuery, ErrorKind,
    IdempotencySweeper, LedgerConfig, LedgerEngine, LedgerEntry, LedgerError, LedgerResult,
    Package, PackageCatalog, UserId, WagerAmounts,
};

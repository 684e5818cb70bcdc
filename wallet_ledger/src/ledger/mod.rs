//! Dual-currency ledger: domain model and transaction engine.

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod errors;
pub mod locks;
pub mod models;
pub mod sweeper;

pub use catalog::{Package, PackageCatalog};
pub use config::{LedgerConfig, parse_env_or};
pub use cursor::Cursor;
pub use engine::LedgerEngine;
pub use errors::{ErrorKind, LedgerError, LedgerResult};
pub use locks::{DEFAULT_LOCK_TABLE_CAPACITY, UserLockGuard, UserLockTable};
pub use models::{
    AccountView, Balances, Currency, CurrencyTotals, EntryFilter, EntryId, EntryKind,
    EntryMetadata, EntryPage, EntryQuery, IdempotencyRecord, LedgerEntry, LifetimeTotals,
    NewEntry, SaveOutcome, User, UserId, WagerAmounts,
};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, IdempotencySweeper};

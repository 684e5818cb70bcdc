//! Storage contract for the ledger engine.
//!
//! The engine only talks to storage through these traits, so the PostgreSQL
//! store and the in-memory store are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ledger::{
    AccountView, Currency, Cursor, EntryFilter, EntryId, IdempotencyRecord, LedgerEntry,
    LedgerResult, NewEntry, SaveOutcome, User, UserId,
};

/// Pool-level ledger storage
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    /// Find user by ID
    async fn get_user(&self, user_id: UserId) -> LedgerResult<Option<User>>;

    /// User with balances and lifetime totals, read from one consistent snapshot
    async fn account_view(&self, user_id: UserId) -> LedgerResult<Option<AccountView>>;

    /// Committed entries in the order of `ids`; a missing id is a storage error
    async fn get_entries(&self, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>>;

    /// Committed idempotency record for (key, user)
    async fn find_idempotency_record(
        &self,
        key: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<IdempotencyRecord>>;

    /// Up to `fetch` entries in canonical order, strictly after `after`
    async fn list_entries(
        &self,
        user_id: UserId,
        filter: &EntryFilter,
        after: Option<&Cursor>,
        fetch: usize,
    ) -> LedgerResult<Vec<LedgerEntry>>;

    /// Delete idempotency records created before `older_than`
    async fn delete_expired_idempotency_keys(&self, older_than: DateTime<Utc>)
    -> LedgerResult<u64>;

    /// Check that the store is reachable
    async fn health_check(&self) -> LedgerResult<()>;
}

/// One store transaction
///
/// Dropping a transaction without calling [`LedgerTx::commit`] rolls it back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Locking read of the idempotency record for (key, user)
    async fn check_idempotency_key(
        &mut self,
        key: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<Vec<EntryId>>>;

    /// Locking read of the latest `balance_after` for (user, currency); 0 without history
    async fn current_balance(&mut self, user_id: UserId, currency: Currency)
    -> LedgerResult<i64>;

    /// Append an entry; the store assigns id and timestamp
    async fn create_entry(&mut self, entry: NewEntry) -> LedgerResult<LedgerEntry>;

    /// Record the entries produced under (key, user)
    async fn save_idempotency_key(
        &mut self,
        key: &str,
        user_id: UserId,
        entry_ids: &[EntryId],
    ) -> LedgerResult<SaveOutcome>;

    /// Entries visible to this transaction, in the order of `ids`
    async fn get_entries(&mut self, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>>;

    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    async fn rollback(self: Box<Self>) -> LedgerResult<()>;
}

/// Reorder `found` to match `ids`, failing if any id is missing
pub(crate) fn order_by_ids(
    ids: &[EntryId],
    mut found: Vec<LedgerEntry>,
) -> LedgerResult<Vec<LedgerEntry>> {
    let mut ordered = Vec::with_capacity(ids.len());
    for id in ids {
        let position = found.iter().position(|entry| entry.id == *id).ok_or_else(|| {
            crate::ledger::LedgerError::Storage(format!("ledger entry {id} is missing"))
        })?;
        ordered.push(found.swap_remove(position));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{EntryKind, LedgerError};

    fn entry(id: EntryId) -> LedgerEntry {
        LedgerEntry {
            id,
            user_id: 1,
            currency: Currency::Gold,
            kind: EntryKind::Win,
            amount: 1,
            balance_after: id,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_order_by_ids() {
        let ordered = order_by_ids(&[3, 1, 2], vec![entry(1), entry(2), entry(3)]).unwrap();
        let ids: Vec<_> = ordered.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_order_by_ids_missing() {
        let err = order_by_ids(&[1, 4], vec![entry(1)]).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }
}

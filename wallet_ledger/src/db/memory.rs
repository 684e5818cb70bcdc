//! In-process ledger store.
//!
//! Mirrors the PostgreSQL store's transactional behaviour:
//! - the first locking read of a transaction takes a per-user row lock that is
//!   held until commit or rollback, with a bounded wait
//! - writes stay private to the transaction until commit
//! - entry ids come from a shared sequence at insert time, so rolled back
//!   transactions leave gaps

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use super::store::{LedgerStore, LedgerTx, order_by_ids};
use super::timeouts::{DEFAULT_STATEMENT_TIMEOUT, with_timeout};
use crate::ledger::{
    AccountView, Balances, Currency, Cursor, EntryFilter, EntryId, IdempotencyRecord,
    LedgerEntry, LedgerError, LedgerResult, LifetimeTotals, NewEntry, SaveOutcome, User,
    UserId, UserLockGuard, UserLockTable,
};

#[derive(Debug, Clone, Copy)]
enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    next_user_id: UserId,
    entries: Vec<LedgerEntry>,
    idempotency: HashMap<(UserId, String), IdempotencyRecord>,
}

impl MemoryState {
    fn balance_view(&self, user_id: UserId) -> (Balances, LifetimeTotals) {
        let mut totals = LifetimeTotals::default();
        for entry in self.entries.iter().filter(|e| e.user_id == user_id) {
            totals.get_mut(entry.currency).record(entry.kind, entry.amount);
        }
        let balances = Balances {
            gold: latest_balance(self.entries.iter(), user_id, Currency::Gold),
            sweeps: latest_balance(self.entries.iter(), user_id, Currency::Sweeps),
        };
        (balances, totals)
    }
}

/// `balance_after` of the newest matching entry in canonical order, or 0
fn latest_balance<'a>(
    entries: impl Iterator<Item = &'a LedgerEntry>,
    user_id: UserId,
    currency: Currency,
) -> i64 {
    entries
        .filter(|e| e.user_id == user_id && e.currency == currency)
        .min_by(|a, b| LedgerEntry::canonical_cmp(a, b))
        .map_or(0, |e| e.balance_after)
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory implementation of [`LedgerStore`]
#[derive(Clone)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    row_locks: UserLockTable,
    next_entry_id: Arc<AtomicI64>,
    clock: Clock,
    lock_timeout: Duration,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                next_user_id: 1,
                ..Default::default()
            })),
            row_locks: UserLockTable::new(),
            next_entry_id: Arc::new(AtomicI64::new(1)),
            clock: Clock::System,
            lock_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    /// Stamp every entry and record with `at` instead of the system clock
    pub fn with_fixed_clock(mut self, at: DateTime<Utc>) -> Self {
        self.clock = Clock::Fixed(at);
        self
    }

    /// Bound on how long a transaction waits for a row lock
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Create a user out-of-band
    pub fn create_user(&self, username: &str) -> User {
        let mut state = lock_state(&self.state);
        let id = state.next_user_id;
        state.next_user_id += 1;
        let user = User {
            id,
            username: username.to_string(),
            created_at: self.clock.now(),
        };
        state.users.insert(id, user.clone());
        user
    }

    /// Number of committed entries across all users
    pub fn entry_count(&self) -> usize {
        lock_state(&self.state).entries.len()
    }

    /// Number of committed idempotency records
    pub fn idempotency_record_count(&self) -> usize {
        lock_state(&self.state).idempotency.len()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx {
            state: self.state.clone(),
            row_locks: self.row_locks.clone(),
            held: HashMap::new(),
            next_entry_id: self.next_entry_id.clone(),
            clock: self.clock,
            lock_timeout: self.lock_timeout,
            pending_entries: Vec::new(),
            pending_keys: Vec::new(),
        }))
    }

    async fn get_user(&self, user_id: UserId) -> LedgerResult<Option<User>> {
        Ok(lock_state(&self.state).users.get(&user_id).cloned())
    }

    async fn account_view(&self, user_id: UserId) -> LedgerResult<Option<AccountView>> {
        let state = lock_state(&self.state);
        let Some(user) = state.users.get(&user_id).cloned() else {
            return Ok(None);
        };
        let (balances, totals) = state.balance_view(user_id);
        Ok(Some(AccountView {
            user,
            balances,
            totals,
        }))
    }

    async fn get_entries(&self, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>> {
        let state = lock_state(&self.state);
        let found = state
            .entries
            .iter()
            .filter(|e| ids.contains(&e.id))
            .cloned()
            .collect();
        order_by_ids(ids, found)
    }

    async fn find_idempotency_record(
        &self,
        key: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<IdempotencyRecord>> {
        Ok(lock_state(&self.state)
            .idempotency
            .get(&(user_id, key.to_string()))
            .cloned())
    }

    async fn list_entries(
        &self,
        user_id: UserId,
        filter: &EntryFilter,
        after: Option<&Cursor>,
        fetch: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let state = lock_state(&self.state);
        let mut page: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && filter.matches(e))
            .filter(|e| after.is_none_or(|cursor| cursor.precedes(e)))
            .cloned()
            .collect();
        page.sort_by(LedgerEntry::canonical_cmp);
        page.truncate(fetch);
        Ok(page)
    }

    async fn delete_expired_idempotency_keys(
        &self,
        older_than: DateTime<Utc>,
    ) -> LedgerResult<u64> {
        let mut state = lock_state(&self.state);
        let before = state.idempotency.len();
        state
            .idempotency
            .retain(|_, record| record.created_at >= older_than);
        Ok((before - state.idempotency.len()) as u64)
    }

    async fn health_check(&self) -> LedgerResult<()> {
        Ok(())
    }
}

struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    row_locks: UserLockTable,
    held: HashMap<UserId, UserLockGuard>,
    next_entry_id: Arc<AtomicI64>,
    clock: Clock,
    lock_timeout: Duration,
    pending_entries: Vec<LedgerEntry>,
    pending_keys: Vec<IdempotencyRecord>,
}

impl MemoryTx {
    /// Equivalent of `SELECT ... FROM users WHERE id = $1 FOR UPDATE`
    async fn lock_user(&mut self, user_id: UserId) -> LedgerResult<()> {
        if self.held.contains_key(&user_id) {
            return Ok(());
        }

        let locks = self.row_locks.clone();
        let guard = with_timeout(self.lock_timeout, async move {
            Ok(locks.acquire(user_id).await)
        })
        .await?;

        let exists = lock_state(&self.state).users.contains_key(&user_id);
        if !exists {
            return Err(LedgerError::UserNotFound(user_id));
        }

        self.held.insert(user_id, guard);
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn check_idempotency_key(
        &mut self,
        key: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<Vec<EntryId>>> {
        self.lock_user(user_id).await?;

        if let Some(record) = self
            .pending_keys
            .iter()
            .find(|r| r.user_id == user_id && r.key == key)
        {
            return Ok(Some(record.entry_ids.clone()));
        }

        Ok(lock_state(&self.state)
            .idempotency
            .get(&(user_id, key.to_string()))
            .map(|record| record.entry_ids.clone()))
    }

    async fn current_balance(
        &mut self,
        user_id: UserId,
        currency: Currency,
    ) -> LedgerResult<i64> {
        self.lock_user(user_id).await?;

        let state = lock_state(&self.state);
        Ok(latest_balance(
            state.entries.iter().chain(self.pending_entries.iter()),
            user_id,
            currency,
        ))
    }

    async fn create_entry(&mut self, entry: NewEntry) -> LedgerResult<LedgerEntry> {
        let id = self.next_entry_id.fetch_add(1, Ordering::SeqCst);
        let entry = entry.into_entry(id, self.clock.now());
        self.pending_entries.push(entry.clone());
        Ok(entry)
    }

    async fn save_idempotency_key(
        &mut self,
        key: &str,
        user_id: UserId,
        entry_ids: &[EntryId],
    ) -> LedgerResult<SaveOutcome> {
        self.lock_user(user_id).await?;

        let pending = self
            .pending_keys
            .iter()
            .any(|r| r.user_id == user_id && r.key == key);
        let committed = lock_state(&self.state)
            .idempotency
            .contains_key(&(user_id, key.to_string()));
        if pending || committed {
            return Ok(SaveOutcome::AlreadyExists);
        }

        self.pending_keys.push(IdempotencyRecord {
            key: key.to_string(),
            user_id,
            entry_ids: entry_ids.to_vec(),
            created_at: self.clock.now(),
        });
        Ok(SaveOutcome::Saved)
    }

    async fn get_entries(&mut self, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>> {
        let state = lock_state(&self.state);
        let found = state
            .entries
            .iter()
            .chain(self.pending_entries.iter())
            .filter(|e| ids.contains(&e.id))
            .cloned()
            .collect();
        order_by_ids(ids, found)
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let MemoryTx {
            state,
            held,
            pending_entries,
            pending_keys,
            ..
        } = *self;

        {
            let mut state = lock_state(&state);
            if let Some(conflict) = pending_keys
                .iter()
                .find(|r| state.idempotency.contains_key(&(r.user_id, r.key.clone())))
            {
                return Err(LedgerError::Storage(format!(
                    "idempotency key {} already committed for user {}",
                    conflict.key, conflict.user_id
                )));
            }
            state.entries.extend(pending_entries);
            for record in pending_keys {
                state
                    .idempotency
                    .insert((record.user_id, record.key.clone()), record);
            }
        }

        // Row locks are released only after the writes are visible.
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EntryKind;

    fn credit(user_id: UserId, amount: i64, before: i64) -> NewEntry {
        NewEntry::on_balance(user_id, Currency::Gold, EntryKind::Purchase, amount, before, None)
            .unwrap()
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let store = MemoryLedgerStore::new();
        let user = store.create_user("alice");

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.current_balance(user.id, Currency::Gold).await.unwrap(), 0);
        let entry = tx.create_entry(credit(user.id, 100, 0)).await.unwrap();
        assert_eq!(tx.current_balance(user.id, Currency::Gold).await.unwrap(), 100);
        assert_eq!(store.entry_count(), 0);
        assert!(store.get_entries(&[entry.id]).await.is_err());

        tx.commit().await.unwrap();
        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.get_entries(&[entry.id]).await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_drop_rolls_back_and_leaves_id_gap() {
        let store = MemoryLedgerStore::new();
        let user = store.create_user("bob");

        let mut tx = store.begin().await.unwrap();
        tx.current_balance(user.id, Currency::Gold).await.unwrap();
        let discarded = tx.create_entry(credit(user.id, 5, 0)).await.unwrap();
        drop(tx);
        assert_eq!(store.entry_count(), 0);

        let mut tx = store.begin().await.unwrap();
        tx.current_balance(user.id, Currency::Gold).await.unwrap();
        let kept = tx.create_entry(credit(user.id, 7, 0)).await.unwrap();
        tx.commit().await.unwrap();
        assert!(kept.id > discarded.id);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_transaction() {
        let store = MemoryLedgerStore::new().with_lock_timeout(Duration::from_millis(30));
        let user = store.create_user("carol");

        let mut first = store.begin().await.unwrap();
        first.current_balance(user.id, Currency::Gold).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second
            .current_balance(user.id, Currency::Gold)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));

        first.rollback().await.unwrap();
        assert_eq!(
            second.current_balance(user.id, Currency::Gold).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_locking_read_on_unknown_user() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.check_idempotency_key("k", 404).await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(404)));
    }

    #[tokio::test]
    async fn test_idempotency_conflict_is_a_value() {
        let store = MemoryLedgerStore::new();
        let user = store.create_user("dave");

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.save_idempotency_key("k1", user.id, &[1]).await.unwrap(),
            SaveOutcome::Saved
        );
        assert_eq!(
            tx.save_idempotency_key("k1", user.id, &[2]).await.unwrap(),
            SaveOutcome::AlreadyExists
        );
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.check_idempotency_key("k1", user.id).await.unwrap(),
            Some(vec![1])
        );
        assert_eq!(
            tx.save_idempotency_key("k1", user.id, &[3]).await.unwrap(),
            SaveOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_delete_expired_idempotency_keys() {
        let t0 = Utc::now() - chrono::Duration::hours(48);
        let store = MemoryLedgerStore::new().with_fixed_clock(t0);
        let user = store.create_user("erin");

        let mut tx = store.begin().await.unwrap();
        tx.save_idempotency_key("old", user.id, &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.delete_expired_idempotency_keys(t0).await.unwrap(), 0);
        let deleted = store
            .delete_expired_idempotency_keys(t0 + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.idempotency_record_count(), 0);
    }
}

//! Idempotent, concurrency-safe ledger engine.
//!
//! Every mutation is expanded into an ordered list of legs and written by one
//! shared pipeline:
//!
//! 1. validate arguments and the idempotency key (no lock, no transaction)
//! 2. check that the user exists
//! 3. take the in-process user lock and open a store transaction, both under
//!    the transaction deadline
//! 4. replay the recorded entries if the key was already used
//! 5. otherwise append one entry per leg, enforcing the zero floor on debits
//! 6. record the key and commit
//!
//! Any failure before commit drops the transaction, which rolls back every leg.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{
    catalog::PackageCatalog,
    config::LedgerConfig,
    cursor::Cursor,
    errors::{LedgerError, LedgerResult},
    locks::UserLockTable,
    models::{
        AccountView, Currency, EntryId, EntryKind, EntryMetadata, EntryPage, EntryQuery,
        LedgerEntry, NewEntry, SaveOutcome, UserId, WagerAmounts,
    },
};
use crate::db::{LedgerStore, with_timeout};

/// One entry to be appended by a mutation
#[derive(Debug, Clone)]
struct Leg {
    currency: Currency,
    kind: EntryKind,
    amount: i64,
    metadata: Option<EntryMetadata>,
}

impl Leg {
    fn new(currency: Currency, kind: EntryKind, amount: i64) -> Self {
        Self {
            currency,
            kind,
            amount,
            metadata: None,
        }
    }

    fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Ledger engine
#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<PackageCatalog>,
    locks: UserLockTable,
    config: LedgerConfig,
}

impl LedgerEngine {
    /// Create a new ledger engine
    ///
    /// # Arguments
    ///
    /// * `store` - Storage collaborator
    /// * `catalog` - Package catalog, loaded once at startup
    /// * `config` - Engine configuration
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<PackageCatalog>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            locks: UserLockTable::with_capacity(config.lock_table_capacity),
            config,
        }
    }

    pub fn catalog(&self) -> &PackageCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Get a user with current balances and lifetime totals
    ///
    /// # Errors
    ///
    /// * `LedgerError::UserNotFound` - Unknown user
    pub async fn get_user_with_balances(&self, user_id: UserId) -> LedgerResult<AccountView> {
        self.store
            .account_view(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    /// List a page of the user's entries in canonical order
    ///
    /// # Arguments
    ///
    /// * `user_id` - User ID
    /// * `query` - Cursor from the previous page, page size and filters
    ///
    /// # Returns
    ///
    /// * `LedgerResult<EntryPage>` - Entries plus a cursor when more remain
    pub async fn list_entries(&self, user_id: UserId, query: EntryQuery) -> LedgerResult<EntryPage> {
        let limit = self.resolve_limit(query.limit)?;
        let after = query
            .cursor
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(Cursor::decode)
            .transpose()?;

        if self.store.get_user(user_id).await?.is_none() {
            return Err(LedgerError::UserNotFound(user_id));
        }

        // One extra row tells whether another page exists.
        let mut items = self
            .store
            .list_entries(user_id, &query.filter, after.as_ref(), limit + 1)
            .await?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|entry| Cursor::from_entry(entry).encode())
        } else {
            None
        };

        Ok(EntryPage { items, next_cursor })
    }

    /// Page size for a caller-supplied limit: absent means default, larger
    /// than the maximum is clamped, zero or negative is rejected.
    pub fn resolve_limit(&self, limit: Option<i64>) -> LedgerResult<usize> {
        let max = self.config.max_page_limit;
        match limit {
            None => Ok(self.config.default_page_limit),
            Some(limit) if limit <= 0 => Err(LedgerError::InvalidInput(
                "limit must be greater than zero".to_string(),
            )),
            Some(limit) => Ok(usize::try_from(limit).map_or(max, |limit| limit.min(max))),
        }
    }

    /// Credit a catalog package
    ///
    /// Writes a GOLD entry and, when the package grants sweeps, a SWEEPS entry.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidPackage` - Unknown package code
    /// * `LedgerError::UserNotFound` - Unknown user
    pub async fn purchase(
        &self,
        user_id: UserId,
        package_code: &str,
        idempotency_key: &str,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let package = self.catalog.resolve(package_code)?;
        let metadata = EntryMetadata::Purchase {
            package_code: package.code.clone(),
            gold_amount: package.gold_amount,
            sweeps_amount: package.sweeps_amount,
        };

        let mut legs = vec![
            Leg::new(Currency::Gold, EntryKind::Purchase, package.gold_amount)
                .with_metadata(metadata.clone()),
        ];
        if package.sweeps_amount > 0 {
            legs.push(
                Leg::new(Currency::Sweeps, EntryKind::Purchase, package.sweeps_amount)
                    .with_metadata(metadata),
            );
        }

        self.apply("purchase", user_id, idempotency_key, legs).await
    }

    /// Apply a wager: stakes debit, payouts credit
    ///
    /// Legs run in the order stake-gold, payout-gold, stake-sweeps,
    /// payout-sweeps; zero amounts are skipped.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidInput` - Negative amount, or all amounts zero
    /// * `LedgerError::InsufficientFunds` - A stake exceeds the balance; nothing is written
    /// * `LedgerError::UserNotFound` - Unknown user
    pub async fn wager(
        &self,
        user_id: UserId,
        amounts: WagerAmounts,
        idempotency_key: &str,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        amounts.validate()?;

        let legs = amounts
            .legs()
            .into_iter()
            .filter(|(_, _, amount)| *amount > 0)
            .map(|(currency, kind, amount)| Leg::new(currency, kind, amount))
            .collect();

        self.apply("wager", user_id, idempotency_key, legs).await
    }

    /// Redeem sweeps
    ///
    /// A key that was already used returns the first entry recorded under it,
    /// even when that key was first used by a different operation; the kind
    /// of the returned entry is not checked against `REDEEM`.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidInput` - Amount is not positive
    /// * `LedgerError::InsufficientFunds` - Not enough sweeps
    /// * `LedgerError::UserNotFound` - Unknown user
    pub async fn redeem(
        &self,
        user_id: UserId,
        amount_sweeps: i64,
        idempotency_key: &str,
    ) -> LedgerResult<LedgerEntry> {
        if amount_sweeps <= 0 {
            return Err(LedgerError::InvalidInput(
                "amount must be greater than zero".to_string(),
            ));
        }

        let legs = vec![Leg::new(Currency::Sweeps, EntryKind::Redeem, amount_sweeps)];
        self.apply("redeem", user_id, idempotency_key, legs)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Storage("redeem recorded no entries".to_string()))
    }

    /// Delete idempotency records older than the retention window
    pub async fn purge_expired_idempotency_keys(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let cutoff = now - self.config.idempotency_retention;
        let deleted = self.store.delete_expired_idempotency_keys(cutoff).await?;
        if deleted > 0 {
            log::info!("Purged {} idempotency keys created before {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    fn validate_idempotency_key(&self, key: &str) -> LedgerResult<()> {
        if key.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "idempotency_key is required".to_string(),
            ));
        }
        if key.chars().count() > self.config.max_idempotency_key_len {
            return Err(LedgerError::InvalidInput(format!(
                "idempotency_key must be at most {} characters",
                self.config.max_idempotency_key_len
            )));
        }
        Ok(())
    }

    async fn apply(
        &self,
        operation: &'static str,
        user_id: UserId,
        idempotency_key: &str,
        legs: Vec<Leg>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        self.validate_idempotency_key(idempotency_key)?;

        if self.store.get_user(user_id).await?.is_none() {
            return Err(LedgerError::UserNotFound(user_id));
        }

        with_timeout(self.config.transaction_timeout, async {
            let _guard = self.locks.acquire(user_id).await;
            self.apply_locked(operation, user_id, idempotency_key, &legs)
                .await
        })
        .await
    }

    async fn apply_locked(
        &self,
        operation: &'static str,
        user_id: UserId,
        idempotency_key: &str,
        legs: &[Leg],
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let mut tx = self.store.begin().await?;

        if let Some(ids) = tx.check_idempotency_key(idempotency_key, user_id).await? {
            let entries = tx.get_entries(&ids).await?;
            tx.commit().await?;
            log::info!(
                "Replayed {} for user {} (key {}, {} entries)",
                operation,
                user_id,
                idempotency_key,
                entries.len()
            );
            return Ok(entries);
        }

        let mut created = Vec::with_capacity(legs.len());
        for leg in legs {
            let balance = tx.current_balance(user_id, leg.currency).await?;

            if leg.kind.is_debit() && balance < leg.amount {
                log::warn!(
                    "Rejected {} for user {}: {} balance {} below {}",
                    operation,
                    user_id,
                    leg.currency,
                    balance,
                    leg.amount
                );
                return Err(LedgerError::InsufficientFunds {
                    currency: leg.currency,
                    available: balance,
                    required: leg.amount,
                });
            }

            let entry = NewEntry::on_balance(
                user_id,
                leg.currency,
                leg.kind,
                leg.amount,
                balance,
                leg.metadata.clone(),
            )?;
            created.push(tx.create_entry(entry).await?);
        }

        let ids: Vec<EntryId> = created.iter().map(|entry| entry.id).collect();
        match tx
            .save_idempotency_key(idempotency_key, user_id, &ids)
            .await?
        {
            SaveOutcome::Saved => {
                tx.commit().await?;
                log::info!(
                    "Committed {} for user {} (key {}, entries {:?})",
                    operation,
                    user_id,
                    idempotency_key,
                    ids
                );
                Ok(created)
            }
            SaveOutcome::AlreadyExists => {
                tx.rollback().await?;
                log::warn!(
                    "Lost idempotency race on {} for user {} (key {}), replaying",
                    operation,
                    user_id,
                    idempotency_key
                );
                self.replay_committed(user_id, idempotency_key).await
            }
        }
    }

    async fn replay_committed(
        &self,
        user_id: UserId,
        idempotency_key: &str,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let record = self
            .store
            .find_idempotency_record(idempotency_key, user_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Storage(format!(
                    "idempotency key {idempotency_key} conflicted but no record is visible"
                ))
            })?;
        self.store.get_entries(&record.entry_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryLedgerStore;
    use crate::ledger::models::EntryFilter;

    fn engine_with(store: &MemoryLedgerStore, config: LedgerConfig) -> LedgerEngine {
        LedgerEngine::new(
            Arc::new(store.clone()),
            Arc::new(PackageCatalog::standard()),
            config,
        )
    }

    fn setup() -> (MemoryLedgerStore, LedgerEngine, UserId) {
        let store = MemoryLedgerStore::new();
        let user = store.create_user("player");
        let engine = engine_with(&store, LedgerConfig::default());
        (store, engine, user.id)
    }

    #[tokio::test]
    async fn test_purchase_writes_both_currencies() {
        let (_, engine, user_id) = setup();

        let entries = engine.purchase(user_id, "starter_10k", "p-1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].currency, Currency::Gold);
        assert_eq!(entries[0].balance_after, 10_000);
        assert_eq!(entries[1].currency, Currency::Sweeps);
        assert_eq!(entries[1].balance_after, 10);
        assert!(matches!(
            entries[1].metadata,
            Some(EntryMetadata::Purchase { ref package_code, .. }) if package_code == "starter_10k"
        ));
    }

    #[tokio::test]
    async fn test_gold_only_package_writes_one_entry() {
        let store = MemoryLedgerStore::new();
        let user = store.create_user("gold_only");
        let catalog = PackageCatalog::new([crate::ledger::Package::new("gold_1k", 1_000, 0)]).unwrap();
        let engine = LedgerEngine::new(
            Arc::new(store.clone()),
            Arc::new(catalog),
            LedgerConfig::default(),
        );

        let entries = engine.purchase(user.id, "gold_1k", "g-1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].currency, Currency::Gold);
    }

    #[tokio::test]
    async fn test_unknown_package_costs_nothing() {
        let (store, engine, user_id) = setup();

        let err = engine.purchase(user_id, "whale_1m", "p-x").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPackage(_)));
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.idempotency_record_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_returns_identical_entries() {
        let (store, engine, user_id) = setup();

        let first = engine.purchase(user_id, "starter_10k", "same").await.unwrap();
        let second = engine.purchase(user_id, "starter_10k", "same").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.entry_count(), 2);

        // The key is bound to its first result, whatever the second request asks for.
        let third = engine.purchase(user_id, "highroller_250k", "same").await.unwrap();
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_user() {
        let (store, engine, alice) = setup();
        let bob = store.create_user("bob").id;

        engine.purchase(alice, "starter_10k", "shared").await.unwrap();
        engine.purchase(bob, "starter_10k", "shared").await.unwrap();
        assert_eq!(store.entry_count(), 4);
    }

    #[tokio::test]
    async fn test_wager_legs_in_fixed_order() {
        let (_, engine, user_id) = setup();
        engine.purchase(user_id, "starter_10k", "p").await.unwrap();

        let amounts = WagerAmounts {
            stake_gold: 100,
            payout_gold: 250,
            stake_sweeps: 2,
            payout_sweeps: 0,
        };
        let entries = engine.wager(user_id, amounts, "w").await.unwrap();
        let legs: Vec<_> = entries
            .iter()
            .map(|e| (e.currency, e.kind, e.amount, e.balance_after))
            .collect();
        assert_eq!(
            legs,
            vec![
                (Currency::Gold, EntryKind::Wager, 100, 9_900),
                (Currency::Gold, EntryKind::Win, 250, 10_150),
                (Currency::Sweeps, EntryKind::Wager, 2, 8),
            ]
        );
    }

    #[tokio::test]
    async fn test_payout_without_balance_succeeds() {
        let (_, engine, user_id) = setup();
        let amounts = WagerAmounts {
            payout_sweeps: 3,
            ..Default::default()
        };
        let entries = engine.wager(user_id, amounts, "free-win").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].balance_after, 3);
    }

    #[tokio::test]
    async fn test_wager_rolls_back_all_legs() {
        let (store, engine, user_id) = setup();
        engine.purchase(user_id, "starter_10k", "p").await.unwrap();
        let before = store.entry_count();

        let amounts = WagerAmounts {
            stake_gold: 10,
            payout_gold: 20,
            stake_sweeps: 11,
            payout_sweeps: 5,
        };
        let err = engine.wager(user_id, amounts, "w").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                currency: Currency::Sweeps,
                available: 10,
                required: 11
            }
        ));
        assert_eq!(store.entry_count(), before);

        // A failed request does not consume its key.
        let retry = WagerAmounts {
            stake_sweeps: 10,
            ..Default::default()
        };
        let entries = engine.wager(user_id, retry, "w").await.unwrap();
        assert_eq!(entries[0].balance_after, 0);
    }

    #[tokio::test]
    async fn test_redeem_validation_and_floor() {
        let (_, engine, user_id) = setup();
        engine.purchase(user_id, "starter_10k", "p").await.unwrap();

        assert!(matches!(
            engine.redeem(user_id, 0, "r0").await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.redeem(user_id, 11, "r1").await,
            Err(LedgerError::InsufficientFunds { .. })
        ));

        let entry = engine.redeem(user_id, 10, "r2").await.unwrap();
        assert_eq!(entry.kind, EntryKind::Redeem);
        assert_eq!(entry.balance_after, 0);
        assert_eq!(engine.redeem(user_id, 10, "r2").await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_idempotency_key_validation() {
        let (_, engine, user_id) = setup();
        let config = LedgerConfig {
            max_idempotency_key_len: 8,
            ..Default::default()
        };
        let short = LedgerEngine::new(
            engine.store().clone(),
            Arc::new(PackageCatalog::standard()),
            config,
        );

        assert!(matches!(
            engine.purchase(user_id, "starter_10k", "  ").await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            short.purchase(user_id, "starter_10k", "123456789").await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(short.purchase(user_id, "starter_10k", "12345678").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (_, engine, _) = setup();
        assert!(matches!(
            engine.redeem(999, 1, "r").await,
            Err(LedgerError::UserNotFound(999))
        ));
        assert!(matches!(
            engine.get_user_with_balances(999).await,
            Err(LedgerError::UserNotFound(999))
        ));
        assert!(matches!(
            engine.list_entries(999, EntryQuery::default()).await,
            Err(LedgerError::UserNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_balances_and_totals() {
        let (_, engine, user_id) = setup();
        engine.purchase(user_id, "starter_10k", "p").await.unwrap();
        let amounts = WagerAmounts {
            stake_gold: 500,
            payout_gold: 200,
            ..Default::default()
        };
        engine.wager(user_id, amounts, "w").await.unwrap();
        engine.redeem(user_id, 4, "r").await.unwrap();

        let view = engine.get_user_with_balances(user_id).await.unwrap();
        assert_eq!(view.balances.gold, 9_700);
        assert_eq!(view.balances.sweeps, 6);
        assert_eq!(view.totals.gold.wagered, 500);
        assert_eq!(view.totals.gold.won, 200);
        assert_eq!(view.totals.sweeps.redeemed, 4);
        assert_eq!(view.totals.gold.redeemed, 0);
    }

    #[test]
    fn test_resolve_limit() {
        let (_, engine, _) = setup();
        assert_eq!(engine.resolve_limit(None).unwrap(), 20);
        assert_eq!(engine.resolve_limit(Some(5)).unwrap(), 5);
        assert_eq!(engine.resolve_limit(Some(1_000)).unwrap(), 100);
        assert!(engine.resolve_limit(Some(0)).is_err());
        assert!(engine.resolve_limit(Some(-3)).is_err());
    }

    #[tokio::test]
    async fn test_list_entries_filters_and_bad_cursor() {
        let (_, engine, user_id) = setup();
        engine.purchase(user_id, "starter_10k", "p").await.unwrap();
        engine
            .wager(
                user_id,
                WagerAmounts {
                    stake_gold: 1,
                    ..Default::default()
                },
                "w",
            )
            .await
            .unwrap();

        let query = EntryQuery {
            filter: EntryFilter {
                kind: None,
                currency: Some(Currency::Gold),
            },
            ..Default::default()
        };
        let page = engine.list_entries(user_id, query).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].kind, EntryKind::Wager);
        assert!(page.next_cursor.is_none());

        let query = EntryQuery {
            cursor: Some("%%%".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            engine.list_entries(user_id, query).await,
            Err(LedgerError::InvalidCursor(_))
        ));
    }

    #[tokio::test]
    async fn test_transaction_timeout_while_lock_held() {
        let store = MemoryLedgerStore::new();
        let user = store.create_user("slow");
        let config = LedgerConfig {
            transaction_timeout: std::time::Duration::from_millis(50),
            ..Default::default()
        };
        let engine = engine_with(&store, config);

        let _held = engine.locks.acquire(user.id).await;
        let err = engine.redeem(user.id, 1, "r").await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));
        assert_eq!(err.kind(), crate::ledger::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_purge_uses_retention_window() {
        let created = Utc::now() - chrono::Duration::hours(30);
        let store = MemoryLedgerStore::new().with_fixed_clock(created);
        let user = store.create_user("old");
        let engine = engine_with(&store, LedgerConfig::default());
        engine.purchase(user.id, "starter_10k", "old-key").await.unwrap();

        assert_eq!(
            engine
                .purge_expired_idempotency_keys(created + chrono::Duration::hours(23))
                .await
                .unwrap(),
            0
        );
        assert_eq!(engine.purge_expired_idempotency_keys(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.entry_count(), 2);
    }
    #[tokio::test]
    async fn test_account_view_survives_total_overflow() {
        let (_, engine, user_id) = setup();
        let win = WagerAmounts {
            payout_gold: i64::MAX,
            ..Default::default()
        };
        let stake = WagerAmounts {
            stake_gold: i64::MAX,
            ..Default::default()
        };
        engine.wager(user_id, win, "win-1").await.unwrap();
        engine.wager(user_id, stake, "stake-1").await.unwrap();
        engine.wager(user_id, win, "win-2").await.unwrap();

        let view = engine.get_user_with_balances(user_id).await.unwrap();
        assert_eq!(view.balances.gold, i64::MAX);
        assert_eq!(view.totals.gold.won, i64::MAX);
        assert_eq!(view.totals.gold.wagered, i64::MAX);
    }

    #[tokio::test]
    async fn test_replay_ignores_operation_of_new_request() {
        let (store, engine, user_id) = setup();

        let purchased = engine.purchase(user_id, "starter_10k", "reused").await.unwrap();
        let replayed = engine.redeem(user_id, 5, "reused").await.unwrap();

        assert_eq!(replayed, purchased[0]);
        assert_eq!(replayed.kind, EntryKind::Purchase);
        assert_eq!(store.entry_count(), 2);
    }

    mod lost_race {
        use super::*;
        use crate::db::LedgerTx;
        use crate::ledger::models::{IdempotencyRecord, User};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Store whose transactions always lose the idempotency insert to an
        /// already committed record.
        struct RacingStore {
            committed: Vec<LedgerEntry>,
            created: Arc<AtomicUsize>,
            commits: Arc<AtomicUsize>,
            rollbacks: Arc<AtomicUsize>,
        }

        struct RacingTx {
            created: Arc<AtomicUsize>,
            commits: Arc<AtomicUsize>,
            rollbacks: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl LedgerStore for RacingStore {
            async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
                Ok(Box::new(RacingTx {
                    created: self.created.clone(),
                    commits: self.commits.clone(),
                    rollbacks: self.rollbacks.clone(),
                }))
            }

            async fn get_user(&self, user_id: UserId) -> LedgerResult<Option<User>> {
                Ok(Some(User {
                    id: user_id,
                    username: "racer".to_string(),
                    created_at: Utc::now(),
                }))
            }

            async fn account_view(&self, _user_id: UserId) -> LedgerResult<Option<AccountView>> {
                Ok(None)
            }

            async fn get_entries(&self, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>> {
                crate::db::store::order_by_ids(ids, self.committed.clone())
            }

            async fn find_idempotency_record(
                &self,
                key: &str,
                user_id: UserId,
            ) -> LedgerResult<Option<IdempotencyRecord>> {
                Ok(Some(IdempotencyRecord {
                    key: key.to_string(),
                    user_id,
                    entry_ids: self.committed.iter().map(|entry| entry.id).collect(),
                    created_at: Utc::now(),
                }))
            }

            async fn list_entries(
                &self,
                _user_id: UserId,
                _filter: &EntryFilter,
                _after: Option<&Cursor>,
                _fetch: usize,
            ) -> LedgerResult<Vec<LedgerEntry>> {
                Ok(Vec::new())
            }

            async fn delete_expired_idempotency_keys(
                &self,
                _older_than: DateTime<Utc>,
            ) -> LedgerResult<u64> {
                Ok(0)
            }

            async fn health_check(&self) -> LedgerResult<()> {
                Ok(())
            }
        }

        #[async_trait]
        impl LedgerTx for RacingTx {
            async fn check_idempotency_key(
                &mut self,
                _key: &str,
                _user_id: UserId,
            ) -> LedgerResult<Option<Vec<EntryId>>> {
                Ok(None)
            }

            async fn current_balance(
                &mut self,
                _user_id: UserId,
                _currency: Currency,
            ) -> LedgerResult<i64> {
                Ok(100)
            }

            async fn create_entry(&mut self, entry: NewEntry) -> LedgerResult<LedgerEntry> {
                let id = 1_000 + self.created.fetch_add(1, Ordering::SeqCst) as EntryId;
                Ok(entry.into_entry(id, Utc::now()))
            }

            async fn save_idempotency_key(
                &mut self,
                _key: &str,
                _user_id: UserId,
                _entry_ids: &[EntryId],
            ) -> LedgerResult<SaveOutcome> {
                Ok(SaveOutcome::AlreadyExists)
            }

            async fn get_entries(&mut self, _ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>> {
                Ok(Vec::new())
            }

            async fn commit(self: Box<Self>) -> LedgerResult<()> {
                self.commits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            async fn rollback(self: Box<Self>) -> LedgerResult<()> {
                self.rollbacks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        #[tokio::test]
        async fn test_lost_insert_race_replays_committed_entries() {
            let committed = vec![
                NewEntry::on_balance(7, Currency::Gold, EntryKind::Wager, 40, 100, None)
                    .unwrap()
                    .into_entry(11, Utc::now()),
                NewEntry::on_balance(7, Currency::Gold, EntryKind::Win, 90, 60, None)
                    .unwrap()
                    .into_entry(12, Utc::now()),
            ];
            let created = Arc::new(AtomicUsize::new(0));
            let commits = Arc::new(AtomicUsize::new(0));
            let rollbacks = Arc::new(AtomicUsize::new(0));
            let store = RacingStore {
                committed: committed.clone(),
                created: created.clone(),
                commits: commits.clone(),
                rollbacks: rollbacks.clone(),
            };
            let engine = LedgerEngine::new(
                Arc::new(store),
                Arc::new(PackageCatalog::standard()),
                LedgerConfig::default(),
            );

            let amounts = WagerAmounts {
                stake_gold: 40,
                payout_gold: 90,
                ..Default::default()
            };
            let entries = engine.wager(7, amounts, "dup").await.unwrap();

            assert_eq!(entries, committed);
            assert_eq!(created.load(Ordering::SeqCst), 2);
            assert_eq!(commits.load(Ordering::SeqCst), 0);
            assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        }
    }
}

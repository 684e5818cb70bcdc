//! PostgreSQL ledger store.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgExecutor, PgPool, Postgres, QueryBuilder, Row, Transaction, postgres::PgRow, types::Json,
};
use std::{collections::HashSet, time::Duration};

use super::store::{LedgerStore, LedgerTx, order_by_ids};
use crate::ledger::{
    AccountView, Balances, Currency, CurrencyTotals, Cursor, EntryFilter, EntryId,
    EntryMetadata, IdempotencyRecord, LedgerEntry, LedgerError, LedgerResult, LifetimeTotals,
    NewEntry, SaveOutcome, User, UserId,
};

const ENTRY_COLUMNS: &str =
    "id, user_id, currency, entry_type, amount, balance_after, metadata, created_at";

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgLedgerStore {
    /// Create a store over `pool`
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `statement_timeout` - Statement and lock wait bound applied to every transaction
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

fn corrupt(err: LedgerError) -> LedgerError {
    LedgerError::Storage(format!("corrupt ledger row: {err}"))
}

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    let currency: String = row.try_get("currency")?;
    let kind: String = row.try_get("entry_type")?;
    let metadata: Option<Json<EntryMetadata>> = row.try_get("metadata")?;

    Ok(LedgerEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        currency: currency.parse().map_err(corrupt)?,
        kind: kind.parse().map_err(corrupt)?,
        amount: row.try_get("amount")?,
        balance_after: row.try_get("balance_after")?,
        metadata: metadata.map(|Json(metadata)| metadata),
        created_at: row.try_get("created_at")?,
    })
}

async fn fetch_entries_by_id<'e, E>(executor: E, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>>
where
    E: PgExecutor<'e>,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(executor)
    .await?;

    let found = rows
        .iter()
        .map(entry_from_row)
        .collect::<LedgerResult<Vec<_>>>()?;
    order_by_ids(ids, found)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await?;

        // Transaction-local, reset on commit or rollback
        let timeout = format!("{}ms", self.statement_timeout.as_millis());
        sqlx::query(
            "SELECT set_config('statement_timeout', $1, true), set_config('lock_timeout', $1, true)",
        )
        .bind(&timeout)
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgLedgerTx {
            tx,
            locked_users: HashSet::new(),
        }))
    }

    async fn get_user(&self, user_id: UserId) -> LedgerResult<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> LedgerResult<User> {
            Ok(User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn account_view(&self, user_id: UserId) -> LedgerResult<Option<AccountView>> {
        // One statement, one snapshot: balances and totals cannot disagree.
        let row = sqlx::query(
            r#"
            SELECT
                u.id, u.username, u.created_at,
                COALESCE((
                    SELECT balance_after FROM ledger_entries
                    WHERE user_id = u.id AND currency = 'GOLD'
                    ORDER BY created_at DESC, id DESC LIMIT 1
                ), 0) AS gold_balance,
                COALESCE((
                    SELECT balance_after FROM ledger_entries
                    WHERE user_id = u.id AND currency = 'SWEEPS'
                    ORDER BY created_at DESC, id DESC LIMIT 1
                ), 0) AS sweeps_balance,
                t.gold_wagered, t.gold_won, t.gold_redeemed,
                t.sweeps_wagered, t.sweeps_won, t.sweeps_redeemed
            FROM users u
            CROSS JOIN LATERAL (
                SELECT
                    LEAST(COALESCE(SUM(amount) FILTER (WHERE currency = 'GOLD' AND entry_type = 'WAGER'), 0), 9223372036854775807)::BIGINT AS gold_wagered,
                    LEAST(COALESCE(SUM(amount) FILTER (WHERE currency = 'GOLD' AND entry_type = 'WIN'), 0), 9223372036854775807)::BIGINT AS gold_won,
                    LEAST(COALESCE(SUM(amount) FILTER (WHERE currency = 'GOLD' AND entry_type = 'REDEEM'), 0), 9223372036854775807)::BIGINT AS gold_redeemed,
                    LEAST(COALESCE(SUM(amount) FILTER (WHERE currency = 'SWEEPS' AND entry_type = 'WAGER'), 0), 9223372036854775807)::BIGINT AS sweeps_wagered,
                    LEAST(COALESCE(SUM(amount) FILTER (WHERE currency = 'SWEEPS' AND entry_type = 'WIN'), 0), 9223372036854775807)::BIGINT AS sweeps_won,
                    LEAST(COALESCE(SUM(amount) FILTER (WHERE currency = 'SWEEPS' AND entry_type = 'REDEEM'), 0), 9223372036854775807)::BIGINT AS sweeps_redeemed
                FROM ledger_entries
                WHERE user_id = u.id
            ) t
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(AccountView {
            user: User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                created_at: row.try_get("created_at")?,
            },
            balances: Balances {
                gold: row.try_get("gold_balance")?,
                sweeps: row.try_get("sweeps_balance")?,
            },
            totals: LifetimeTotals {
                gold: CurrencyTotals {
                    wagered: row.try_get("gold_wagered")?,
                    won: row.try_get("gold_won")?,
                    redeemed: row.try_get("gold_redeemed")?,
                },
                sweeps: CurrencyTotals {
                    wagered: row.try_get("sweeps_wagered")?,
                    won: row.try_get("sweeps_won")?,
                    redeemed: row.try_get("sweeps_redeemed")?,
                },
            },
        }))
    }

    async fn get_entries(&self, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>> {
        fetch_entries_by_id(&self.pool, ids).await
    }

    async fn find_idempotency_record(
        &self,
        key: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, user_id, entry_ids, created_at
            FROM idempotency_keys
            WHERE key = $1 AND user_id = $2
            "#,
        )
        .bind(key)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> LedgerResult<IdempotencyRecord> {
            Ok(IdempotencyRecord {
                key: row.try_get("key")?,
                user_id: row.try_get("user_id")?,
                entry_ids: row.try_get("entry_ids")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn list_entries(
        &self,
        user_id: UserId,
        filter: &EntryFilter,
        after: Option<&Cursor>,
        fetch: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = "
        ));
        query.push_bind(user_id);

        if let Some(kind) = filter.kind {
            query.push(" AND entry_type = ").push_bind(kind.as_str());
        }
        if let Some(currency) = filter.currency {
            query.push(" AND currency = ").push_bind(currency.as_str());
        }
        if let Some(cursor) = after {
            query
                .push(" AND (created_at < ")
                .push_bind(cursor.created_at)
                .push(" OR (created_at = ")
                .push_bind(cursor.created_at)
                .push(" AND id < ")
                .push_bind(cursor.id)
                .push("))");
        }

        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::try_from(fetch).unwrap_or(i64::MAX));

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn delete_expired_idempotency_keys(
        &self,
        older_than: DateTime<Utc>,
    ) -> LedgerResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
    locked_users: HashSet<UserId>,
}

impl PgLedgerTx {
    /// Serialize on the user row before the first read of the user's state.
    ///
    /// `LIMIT 1 FOR UPDATE` alone can return a row that was superseded while
    /// the statement waited, so the user row is the real serialization point.
    async fn lock_user(&mut self, user_id: UserId) -> LedgerResult<()> {
        if self.locked_users.contains(&user_id) {
            return Ok(());
        }

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        self.locked_users.insert(user_id);
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn check_idempotency_key(
        &mut self,
        key: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<Vec<EntryId>>> {
        self.lock_user(user_id).await?;

        let row = sqlx::query(
            r#"
            SELECT entry_ids FROM idempotency_keys
            WHERE key = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(key)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|row| row.try_get("entry_ids")).transpose()?)
    }

    async fn current_balance(
        &mut self,
        user_id: UserId,
        currency: Currency,
    ) -> LedgerResult<i64> {
        self.lock_user(user_id).await?;

        let row = sqlx::query(
            r#"
            SELECT balance_after FROM ledger_entries
            WHERE user_id = $1 AND currency = $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(currency.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("balance_after")?),
            None => Ok(0),
        }
    }

    async fn create_entry(&mut self, entry: NewEntry) -> LedgerResult<LedgerEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (user_id, currency, entry_type, amount, balance_after, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, clock_timestamp())
            RETURNING id, created_at
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.currency.as_str())
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.metadata.clone().map(Json))
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry.into_entry(row.try_get("id")?, row.try_get("created_at")?))
    }

    async fn save_idempotency_key(
        &mut self,
        key: &str,
        user_id: UserId,
        entry_ids: &[EntryId],
    ) -> LedgerResult<SaveOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, user_id, entry_ids)
            VALUES ($1, $2, $3)
            ON CONFLICT (key, user_id) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(user_id)
        .bind(entry_ids)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(match inserted {
            Some(_) => SaveOutcome::Saved,
            None => SaveOutcome::AlreadyExists,
        })
    }

    async fn get_entries(&mut self, ids: &[EntryId]) -> LedgerResult<Vec<LedgerEntry>> {
        fetch_entries_by_id(&mut *self.tx, ids).await
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let PgLedgerTx { tx, .. } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        let PgLedgerTx { tx, .. } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

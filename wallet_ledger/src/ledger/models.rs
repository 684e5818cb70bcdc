//! Ledger data models.

use super::errors::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};

/// User ID type
pub type UserId = i64;

/// Ledger entry ID type (monotonic, store-assigned)
pub type EntryId = i64;

/// Wallet currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Gold,
    Sweeps,
}

impl Currency {
    /// Every currency, in reporting order
    pub const ALL: [Currency; 2] = [Currency::Gold, Currency::Sweeps];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Gold => "GOLD",
            Currency::Sweeps => "SWEEPS",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GOLD" => Ok(Currency::Gold),
            "SWEEPS" => Ok(Currency::Sweeps),
            other => Err(LedgerError::InvalidInput(format!(
                "unknown currency '{other}', expected GOLD or SWEEPS"
            ))),
        }
    }
}

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Purchase,
    Wager,
    Win,
    Redeem,
}

impl EntryKind {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Purchase => "PURCHASE",
            EntryKind::Wager => "WAGER",
            EntryKind::Win => "WIN",
            EntryKind::Redeem => "REDEEM",
        }
    }

    /// Debits reduce the balance and are subject to the zero floor.
    pub fn is_debit(&self) -> bool {
        matches!(self, EntryKind::Wager | EntryKind::Redeem)
    }

    /// Signed effect of an entry of this kind on the running balance
    pub fn signed(&self, amount: i64) -> i64 {
        if self.is_debit() { -amount } else { amount }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE" => Ok(EntryKind::Purchase),
            "WAGER" => Ok(EntryKind::Wager),
            "WIN" => Ok(EntryKind::Win),
            "REDEEM" => Ok(EntryKind::Redeem),
            other => Err(LedgerError::InvalidInput(format!(
                "unknown entry type '{other}'"
            ))),
        }
    }
}

/// User identity, created out-of-band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Structured payload attached to an entry, serialized only at the storage boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryMetadata {
    Purchase {
        package_code: String,
        gold_amount: i64,
        sweeps_amount: i64,
    },
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub currency: Currency,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Canonical order: newest first by `created_at`, ties broken by descending id.
    pub fn canonical_cmp(a: &LedgerEntry, b: &LedgerEntry) -> Ordering {
        b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
    }
}

/// Entry waiting for the store to assign its id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub user_id: UserId,
    pub currency: Currency,
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    pub metadata: Option<EntryMetadata>,
}

impl NewEntry {
    /// Build an entry on top of `balance_before`, computing `balance_after`.
    pub fn on_balance(
        user_id: UserId,
        currency: Currency,
        kind: EntryKind,
        amount: i64,
        balance_before: i64,
        metadata: Option<EntryMetadata>,
    ) -> LedgerResult<Self> {
        let balance_after = balance_before
            .checked_add(kind.signed(amount))
            .ok_or(LedgerError::BalanceOverflow(currency))?;

        Ok(Self {
            user_id,
            currency,
            kind,
            amount,
            balance_after,
            metadata,
        })
    }

    /// Attach the store-assigned id and timestamp
    pub fn into_entry(self, id: EntryId, created_at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id,
            user_id: self.user_id,
            currency: self.currency,
            kind: self.kind,
            amount: self.amount,
            balance_after: self.balance_after,
            metadata: self.metadata,
            created_at,
        }
    }
}

/// Mapping from (key, user) to the entries produced by the first execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub user_id: UserId,
    pub entry_ids: Vec<EntryId>,
    pub created_at: DateTime<Utc>,
}

/// Result of persisting an idempotency record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Another transaction committed a record for the same (key, user) first
    AlreadyExists,
}

/// Current balance per currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub gold: i64,
    pub sweeps: i64,
}

impl Balances {
    pub fn get(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Gold => self.gold,
            Currency::Sweeps => self.sweeps,
        }
    }
}

/// Lifetime aggregates for one currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub wagered: i64,
    pub won: i64,
    pub redeemed: i64,
}

impl CurrencyTotals {
    /// Fold one entry into the aggregates; purchases are not aggregated.
    ///
    /// Totals saturate at `i64::MAX`: each entry is bounded by its running
    /// balance, but the sum over a lifetime is not.
    pub fn record(&mut self, kind: EntryKind, amount: i64) {
        let total = match kind {
            EntryKind::Wager => &mut self.wagered,
            EntryKind::Win => &mut self.won,
            EntryKind::Redeem => &mut self.redeemed,
            EntryKind::Purchase => return,
        };
        *total = total.saturating_add(amount);
    }
}

/// Lifetime aggregates per currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeTotals {
    pub gold: CurrencyTotals,
    pub sweeps: CurrencyTotals,
}

impl LifetimeTotals {
    pub fn get_mut(&mut self, currency: Currency) -> &mut CurrencyTotals {
        match currency {
            Currency::Gold => &mut self.gold,
            Currency::Sweeps => &mut self.sweeps,
        }
    }
}

/// User together with views derived from the entry log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub user: User,
    pub balances: Balances,
    pub totals: LifetimeTotals,
}

/// Optional filters for history listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub kind: Option<EntryKind>,
    pub currency: Option<Currency>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.kind.is_none_or(|kind| entry.kind == kind)
            && self.currency.is_none_or(|currency| entry.currency == currency)
    }
}

/// History query as received from the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub filter: EntryFilter,
}

/// One page of history in canonical order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPage {
    pub items: Vec<LedgerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// The four amounts of a wager; zero means the leg is skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerAmounts {
    #[serde(default)]
    pub stake_gold: i64,
    #[serde(default)]
    pub payout_gold: i64,
    #[serde(default)]
    pub stake_sweeps: i64,
    #[serde(default)]
    pub payout_sweeps: i64,
}

impl WagerAmounts {
    /// Legs in processing order: stake-gold, payout-gold, stake-sweeps, payout-sweeps
    pub fn legs(&self) -> [(Currency, EntryKind, i64); 4] {
        [
            (Currency::Gold, EntryKind::Wager, self.stake_gold),
            (Currency::Gold, EntryKind::Win, self.payout_gold),
            (Currency::Sweeps, EntryKind::Wager, self.stake_sweeps),
            (Currency::Sweeps, EntryKind::Win, self.payout_sweeps),
        ]
    }

    pub fn validate(&self) -> LedgerResult<()> {
        let amounts = self.legs().map(|(_, _, amount)| amount);
        if amounts.iter().any(|amount| *amount < 0) {
            return Err(LedgerError::InvalidInput(
                "amounts cannot be negative".to_string(),
            ));
        }
        if amounts.iter().all(|amount| *amount == 0) {
            return Err(LedgerError::InvalidInput(
                "at least one amount must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

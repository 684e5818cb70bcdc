//! Opaque pagination cursors.
//!
//! A cursor names the last entry of a page by `(id, created_at)`. The token is
//! `base64url("<id>:<rfc3339 with nanoseconds>")` without padding, so it can be
//! placed in a query string as-is.

use super::errors::{LedgerError, LedgerResult};
use super::models::{EntryId, LedgerEntry};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, SecondsFormat, Utc};

/// Position in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub id: EntryId,
    pub created_at: DateTime<Utc>,
}

impl Cursor {
    pub fn new(id: EntryId, created_at: DateTime<Utc>) -> Self {
        Self { id, created_at }
    }

    /// Cursor pointing at `entry`
    pub fn from_entry(entry: &LedgerEntry) -> Self {
        Self::new(entry.id, entry.created_at)
    }

    /// Encode into an opaque, URL-safe token
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}:{}",
            self.id,
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode a token produced by [`Cursor::encode`]
    pub fn decode(token: &str) -> LedgerResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| LedgerError::InvalidCursor(format!("not base64url: {e}")))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| LedgerError::InvalidCursor("not utf-8".to_string()))?;

        // Split on the first colon only; the timestamp contains colons.
        let (id, timestamp) = raw
            .split_once(':')
            .ok_or_else(|| LedgerError::InvalidCursor("missing separator".to_string()))?;

        let id: EntryId = id
            .parse()
            .map_err(|_| LedgerError::InvalidCursor(format!("bad entry id '{id}'")))?;
        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| LedgerError::InvalidCursor(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Self { id, created_at })
    }

    /// Whether `entry` lies strictly after this position in canonical order.
    ///
    /// `created_at < cursor.created_at OR (created_at = cursor.created_at AND id < cursor.id)`
    pub fn precedes(&self, entry: &LedgerEntry) -> bool {
        entry.created_at < self.created_at
            || (entry.created_at == self.created_at && entry.id < self.id)
    }
}

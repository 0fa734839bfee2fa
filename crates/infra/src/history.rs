//! History reconstruction: a key's versioned write log as point-in-time
//! snapshots.
//!
//! The mapping is structural: one entry per store write, in the store's
//! native order (oldest first), nothing filtered or merged. A key that was
//! never written yields an empty history rather than an error.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use shipledger_assets::{Asset, CodecError};
use shipledger_core::TxId;

use crate::error::LedgerError;
use crate::ledger_store::{HistoryCursor, KeyModification, LedgerStore};

/// Raw stored bytes of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The stored value as JSON; auxiliary values that are not JSON are
    /// rendered as a (lossy UTF-8) JSON string.
    pub fn as_json(&self) -> JsonValue {
        serde_json::from_slice(&self.0)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&self.0).into_owned()))
    }

    /// Decode the snapshot as whichever asset shape it carries.
    pub fn asset(&self) -> Result<Asset, CodecError> {
        Asset::detect(&self.0)
    }
}

/// One version of a key.
///
/// `value` is `None` exactly when `is_delete` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub tx_id: TxId,
    pub value: Option<Snapshot>,
    pub timestamp: DateTime<Utc>,
    pub is_delete: bool,
}

impl HistoryEntry {
    pub fn to_json(&self) -> JsonValue {
        json!({
            "TxId": self.tx_id.to_string(),
            "Value": self.value.as_ref().map(Snapshot::as_json).unwrap_or(JsonValue::Null),
            "Timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            "IsDelete": self.is_delete.to_string(),
        })
    }
}

impl From<KeyModification> for HistoryEntry {
    fn from(m: KeyModification) -> Self {
        let value = if m.is_delete {
            None
        } else {
            m.value.map(Snapshot)
        };
        Self {
            tx_id: m.tx_id,
            value,
            timestamp: m.timestamp,
            is_delete: m.is_delete,
        }
    }
}

/// Lazy, single-pass sequence of a key's history entries.
pub struct History<'a> {
    key: String,
    cursor: HistoryCursor<'a>,
}

impl History<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Render the remaining entries as a JSON array.
    pub fn into_json(self) -> Result<JsonValue, LedgerError> {
        let entries = self
            .map(|entry| entry.map(|e| e.to_json()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JsonValue::Array(entries))
    }
}

impl Iterator for History<'_> {
    type Item = Result<HistoryEntry, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor
            .next()
            .map(|m| m.map(HistoryEntry::from).map_err(LedgerError::from))
    }
}

impl core::fmt::Debug for History<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("History").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Open the history of `key`.
pub fn history_of<'a, S: LedgerStore>(store: &'a S, key: &str) -> Result<History<'a>, LedgerError> {
    if key.trim().is_empty() {
        return Err(LedgerError::validation("key must not be blank"));
    }
    debug!(key, "history requested");
    Ok(History {
        key: key.to_string(),
        cursor: store.history(key)?,
    })
}

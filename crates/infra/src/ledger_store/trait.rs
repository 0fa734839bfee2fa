use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use shipledger_core::{ExpectedVersion, TxId};

/// One entry of a key's write log: a put or a tombstone.
///
/// `version` is the 1-based position of the write in the key's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyModification {
    pub tx_id: TxId,
    pub version: u64,
    pub value: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    pub is_delete: bool,
}

/// Latest live value of a key, with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: u64,
}

/// Acknowledgement of a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub tx_id: TxId,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

/// Ledger store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, missing records).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Single-pass cursor over a key's write log, oldest first.
pub type HistoryCursor<'a> = Box<dyn Iterator<Item = Result<KeyModification, StoreError>> + Send + 'a>;

/// Append-history key/value store.
///
/// Every put or delete appends a new version to the key's log; nothing is
/// ever physically erased. Reads return the latest version.
///
/// ## Versions
///
/// A key's version is the number of writes in its log (tombstones included),
/// so an unknown key is at version 0. Writes carry an [`ExpectedVersion`];
/// a mismatch fails with [`StoreError::Concurrency`] and writes nothing.
///
/// ## Multi-key writes
///
/// There is no multi-key transaction primitive. Callers composing several
/// writes into one logical update order them and compensate on failure.
///
/// ## Implementation requirements
///
/// - versions are assigned monotonically per key (no gaps, no duplicates)
/// - timestamps are non-decreasing in write order
/// - a single `put`/`delete` is atomic and durable once it returns `Ok`
pub trait LedgerStore: Send + Sync {
    /// Latest live value, or `None` if the key was never written or its
    /// latest write is a tombstone.
    fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError>;

    /// Current version of the key (0 if never written).
    fn version(&self, key: &str) -> Result<u64, StoreError>;

    fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, StoreError>;

    /// Append a tombstone for the key.
    fn delete(&self, key: &str, expected: ExpectedVersion) -> Result<WriteReceipt, StoreError>;

    /// Replay the key's full write log in write order.
    fn history(&self, key: &str) -> Result<HistoryCursor<'_>, StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError> {
        (**self).get(key)
    }

    fn version(&self, key: &str) -> Result<u64, StoreError> {
        (**self).version(key)
    }

    fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, StoreError> {
        (**self).put(key, value, expected)
    }

    fn delete(&self, key: &str, expected: ExpectedVersion) -> Result<WriteReceipt, StoreError> {
        (**self).delete(key, expected)
    }

    fn history(&self, key: &str) -> Result<HistoryCursor<'_>, StoreError> {
        (**self).history(key)
    }
}

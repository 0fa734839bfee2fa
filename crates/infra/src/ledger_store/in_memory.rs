use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use shipledger_core::{ExpectedVersion, TxId};

use super::r#trait::{
    HistoryCursor, KeyModification, LedgerStore, StoreError, VersionedValue, WriteReceipt,
};

#[derive(Debug, Default)]
struct StoreState {
    logs: HashMap<String, Vec<KeyModification>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Wall clock, clamped so timestamps never run backwards.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn append(
        &mut self,
        key: &str,
        value: Option<Vec<u8>>,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, StoreError> {
        let current = self.logs.get(key).map(|log| log.len() as u64).unwrap_or(0);
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "key '{key}': expected {expected:?}, found {current}"
            )));
        }

        let timestamp = self.next_timestamp();
        let receipt = WriteReceipt {
            tx_id: TxId::new(),
            version: current + 1,
            timestamp,
        };
        let is_delete = value.is_none();
        self.logs
            .entry(key.to_string())
            .or_default()
            .push(KeyModification {
                tx_id: receipt.tx_id,
                version: receipt.version,
                value,
                timestamp,
                is_delete,
            });

        Ok(receipt)
    }
}

/// In-memory append-history ledger store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<StoreState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with at least one write, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let state = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let mut keys: Vec<String> = state.logs.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError> {
        let state = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        Ok(state.logs.get(key).and_then(|log| log.last()).and_then(|m| {
            m.value.as_ref().map(|value| VersionedValue {
                value: value.clone(),
                version: m.version,
            })
        }))
    }

    fn version(&self, key: &str) -> Result<u64, StoreError> {
        let state = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(state.logs.get(key).map(|log| log.len() as u64).unwrap_or(0))
    }

    fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, StoreError> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        state.append(key, Some(value), expected)
    }

    fn delete(&self, key: &str, expected: ExpectedVersion) -> Result<WriteReceipt, StoreError> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        state.append(key, None, expected)
    }

    fn history(&self, key: &str) -> Result<HistoryCursor<'_>, StoreError> {
        let state = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        // Snapshot the log so the cursor does not hold the lock.
        let log = state.logs.get(key).cloned().unwrap_or_default();
        Ok(Box::new(log.into_iter().map(Ok::<_, StoreError>)))
    }
}

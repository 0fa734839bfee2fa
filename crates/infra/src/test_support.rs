//! Test doubles.

use std::collections::HashMap;
use std::sync::Mutex;

use shipledger_core::ExpectedVersion;

use crate::ledger_store::{
    HistoryCursor, InMemoryLedgerStore, LedgerStore, StoreError, VersionedValue, WriteReceipt,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Failure {
    Backend,
    Conflict,
}

impl Failure {
    fn to_error(self, key: &str) -> StoreError {
        match self {
            Failure::Backend => StoreError::Backend(format!("injected failure writing '{key}'")),
            Failure::Conflict => StoreError::Concurrency(format!("injected conflict on '{key}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Injection {
    /// Puts that still succeed before the failure kicks in.
    remaining_ok: usize,
    failure: Failure,
}

/// [`InMemoryLedgerStore`] whose `put` fails on selected keys.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryLedgerStore,
    injections: Mutex<HashMap<String, Injection>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent put to `key`.
    pub fn fail_puts(&self, key: &str, failure: Failure) {
        self.fail_puts_after(key, 0, failure);
    }

    /// Let `ok` more puts to `key` through, then fail every one after.
    pub fn fail_puts_after(&self, key: &str, ok: usize, failure: Failure) {
        self.injections.lock().unwrap().insert(
            key.to_string(),
            Injection {
                remaining_ok: ok,
                failure,
            },
        );
    }

    pub fn clear_failures(&self) {
        self.injections.lock().unwrap().clear();
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys()
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        let mut injections = self.injections.lock().unwrap();
        match injections.get_mut(key) {
            Some(inj) if inj.remaining_ok > 0 => {
                inj.remaining_ok -= 1;
                Ok(())
            }
            Some(inj) => Err(inj.failure.to_error(key)),
            None => Ok(()),
        }
    }
}

impl LedgerStore for FailingStore {
    fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError> {
        self.inner.get(key)
    }

    fn version(&self, key: &str) -> Result<u64, StoreError> {
        self.inner.version(key)
    }

    fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, StoreError> {
        self.check(key)?;
        self.inner.put(key, value, expected)
    }

    fn delete(&self, key: &str, expected: ExpectedVersion) -> Result<WriteReceipt, StoreError> {
        self.inner.delete(key, expected)
    }

    fn history(&self, key: &str) -> Result<HistoryCursor<'_>, StoreError> {
        self.inner.history(key)
    }
}

//! Versioned key/value ledger boundary.
//!
//! This module defines the storage abstraction the registry, transaction
//! engine and history reconstructor run against, without making any storage
//! assumptions beyond per-key versioning.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{
    HistoryCursor, KeyModification, LedgerStore, StoreError, VersionedValue, WriteReceipt,
};

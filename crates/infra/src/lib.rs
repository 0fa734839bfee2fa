//! Ledger services: storage boundary, asset registry, transaction engine,
//! history reconstruction and the named-operation dispatcher.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod ledger_store;
pub mod registry;
pub mod transaction_engine;

#[cfg(test)]
mod test_support;

pub use config::LedgerConfig;
pub use dispatcher::{Dispatcher, Operation};
pub use error::{ErrorKind, LedgerError};
pub use history::{History, HistoryEntry, Snapshot, history_of};
pub use ledger_store::{InMemoryLedgerStore, LedgerStore};
pub use registry::{AssetRegistry, Versioned};
pub use transaction_engine::{AppliedTransfer, ChangeOutcome, StatusChange, TransactionEngine};

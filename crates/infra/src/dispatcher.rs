//! Named-operation entry point.
//!
//! Callers outside the crate address the ledger by operation name plus a list
//! of string arguments. The dispatcher parses the name into an [`Operation`],
//! checks arity and routes to the registry, the transaction engine or the
//! history reconstructor. Every result is plain bytes; every failure is a
//! [`LedgerError`] so callers can branch on [`LedgerError::kind`].

use std::str::FromStr;

use tracing::{info, instrument, warn};

use shipledger_assets::AssetType;
use shipledger_core::ExpectedVersion;

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::history::history_of;
use crate::ledger_store::LedgerStore;
use crate::registry::AssetRegistry;
use crate::transaction_engine::{StatusChange, TransactionEngine};

pub const ASSET_CREATED: &str = "A new asset was created!";
pub const STATUS_CHANGED: &str = "Status changed and transaction executed.";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Init,
    SetAsset,
    UpdateOrderStatus,
    DeleteAsset,
    RawWrite,
    Read,
    HistoryOf,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Init,
        Operation::SetAsset,
        Operation::UpdateOrderStatus,
        Operation::DeleteAsset,
        Operation::RawWrite,
        Operation::Read,
        Operation::HistoryOf,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Init => "init",
            Operation::SetAsset => "setAsset",
            Operation::UpdateOrderStatus => "updateOrderStatus",
            Operation::DeleteAsset => "deleteAsset",
            Operation::RawWrite => "rawWrite",
            Operation::Read => "read",
            Operation::HistoryOf => "historyOf",
        }
    }

    /// Exact number of arguments the operation takes.
    pub fn arity(self) -> usize {
        match self {
            Operation::Init | Operation::DeleteAsset | Operation::Read | Operation::HistoryOf => 1,
            Operation::SetAsset | Operation::UpdateOrderStatus | Operation::RawWrite => 2,
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" | "Init" => Ok(Operation::Init),
            "setAsset" | "SetAsset" => Ok(Operation::SetAsset),
            "updateOrderStatus" | "UpdateOrderStatus" => Ok(Operation::UpdateOrderStatus),
            "deleteAsset" | "DeleteAsset" => Ok(Operation::DeleteAsset),
            "rawWrite" | "write" | "ContainerHistorian" => Ok(Operation::RawWrite),
            "read" => Ok(Operation::Read),
            "historyOf" | "GetHistoryForAsset" => Ok(Operation::HistoryOf),
            other => Err(LedgerError::UnknownOperation(format!(
                "received unknown operation: {other}"
            ))),
        }
    }
}

pub struct Dispatcher<S> {
    engine: TransactionEngine<S>,
    config: LedgerConfig,
}

impl<S> Dispatcher<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        let engine = TransactionEngine::new(AssetRegistry::new(store), &config);
        Self { engine, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn engine(&self) -> &TransactionEngine<S> {
        &self.engine
    }

    pub fn registry(&self) -> &AssetRegistry<S> {
        self.engine.registry()
    }
}

impl<S: LedgerStore> Dispatcher<S> {
    /// Run `operation` with `args`.
    #[instrument(skip(self, args), fields(args = args.len()))]
    pub fn invoke<A: AsRef<str>>(&self, operation: &str, args: &[A]) -> Result<Vec<u8>, LedgerError> {
        let op: Operation = operation.parse().inspect_err(|_| {
            warn!(operation, "unknown operation");
        })?;
        if args.len() != op.arity() {
            return Err(LedgerError::validation(format!(
                "incorrect number of arguments for {op}: expecting {}, got {}",
                op.arity(),
                args.len()
            )));
        }
        let arg = |i: usize| args[i].as_ref();

        match op {
            Operation::Init => {
                self.init(arg(0))?;
                Ok(Vec::new())
            }
            Operation::SetAsset => {
                let asset_type: AssetType = arg(0).parse()?;
                self.registry()
                    .create_or_replace(asset_type, arg(1).as_bytes())?;
                Ok(ASSET_CREATED.as_bytes().to_vec())
            }
            Operation::UpdateOrderStatus => {
                self.update_order_status(arg(0), arg(1))?;
                Ok(STATUS_CHANGED.as_bytes().to_vec())
            }
            Operation::DeleteAsset => {
                self.registry().delete(arg(0))?;
                Ok(format!("The asset {} was deleted!", arg(0)).into_bytes())
            }
            Operation::RawWrite => {
                self.registry().raw_write(arg(0), arg(1).as_bytes().to_vec())?;
                Ok(Vec::new())
            }
            Operation::Read => self.registry().raw_read(arg(0)),
            Operation::HistoryOf => {
                let history = history_of(self.registry().store(), arg(0))?;
                serde_json::to_vec(&history.into_json()?)
                    .map_err(|e| LedgerError::persistence(format!("failed to render history: {e}")))
            }
        }
    }

    pub fn update_order_status(
        &self,
        order_id: &str,
        new_status: &str,
    ) -> Result<StatusChange, LedgerError> {
        self.engine.update_order_status(order_id, new_status)
    }

    /// Record the ledger owner. Repeating with the same owner is a no-op;
    /// a different owner is rejected.
    pub fn init(&self, owner: &str) -> Result<(), LedgerError> {
        if owner.trim().is_empty() {
            return Err(LedgerError::validation("owner must not be blank"));
        }
        match self.owner()? {
            Some(current) if current == owner => Ok(()),
            Some(current) => Err(LedgerError::Conflict(format!(
                "ledger already initialised with owner {current}"
            ))),
            None => {
                // Exact version so two racing inits cannot both win.
                let key = &self.config.owner_key;
                let version = self.registry().raw_version(key)?;
                self.registry()
                    .raw_put(key, owner.as_bytes().to_vec(), ExpectedVersion::Exact(version))?;
                info!(owner, "ledger initialised");
                Ok(())
            }
        }
    }

    /// The persisted owner marker, if `init` has run.
    pub fn owner(&self) -> Result<Option<String>, LedgerError> {
        self.registry()
            .raw_get(&self.config.owner_key)?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| LedgerError::persistence(format!("owner marker is not UTF-8: {e}")))
            })
            .transpose()
    }
}

impl<S> core::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish()
    }
}

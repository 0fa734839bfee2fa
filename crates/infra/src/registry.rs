//! Asset registry: typed create/replace/delete of assets plus raw key access.

use tracing::{debug, info, instrument};

use shipledger_assets::codec::{self, WireFormat};
use shipledger_assets::{Account, Asset, AssetType, CodecError, Order};
use shipledger_core::{Entity, ExpectedVersion};

use crate::error::LedgerError;
use crate::ledger_store::{KeyModification, LedgerStore, VersionedValue, WriteReceipt};

/// A decoded record with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Thin layer over a [`LedgerStore`] that knows how assets are encoded.
#[derive(Debug)]
pub struct AssetRegistry<S> {
    store: S,
}

impl<S> AssetRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: LedgerStore> AssetRegistry<S> {
    /// Decode `payload` as `asset_type` and write it, canonically re-encoded,
    /// under its own id. An existing record with that id is overwritten.
    #[instrument(skip(self, payload), fields(asset_type = %asset_type))]
    pub fn create_or_replace(
        &self,
        asset_type: AssetType,
        payload: &[u8],
    ) -> Result<Asset, LedgerError> {
        let asset = Asset::decode(asset_type, payload)?;
        let bytes = asset.encode()?;
        let receipt = self.store.put(asset.key(), bytes, ExpectedVersion::Any)?;

        info!(
            asset_id = %asset.id(),
            version = receipt.version,
            tx_id = %receipt.tx_id,
            "asset written"
        );
        Ok(asset)
    }

    /// Tombstone an existing record.
    #[instrument(skip(self))]
    pub fn delete(&self, asset_id: &str) -> Result<WriteReceipt, LedgerError> {
        ensure_key(asset_id)?;
        let current = self
            .store
            .get(asset_id)?
            .ok_or_else(|| LedgerError::not_found(format!("asset {asset_id} does not exist")))?;

        let receipt = self
            .store
            .delete(asset_id, ExpectedVersion::Exact(current.version))?;
        info!(version = receipt.version, tx_id = %receipt.tx_id, "asset deleted");
        Ok(receipt)
    }

    /// Opaque passthrough write for auxiliary records.
    #[instrument(skip(self, value), fields(len = value.len()))]
    pub fn raw_write(&self, key: &str, value: Vec<u8>) -> Result<WriteReceipt, LedgerError> {
        self.raw_put(key, value, ExpectedVersion::Any)
    }

    pub fn raw_read(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        self.raw_get(key)?
            .ok_or_else(|| LedgerError::not_found(format!("no value stored under '{key}'")))
    }

    pub(crate) fn raw_put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, LedgerError> {
        ensure_key(key)?;
        let receipt = self.store.put(key, value, expected)?;
        debug!(key, version = receipt.version, "raw value written");
        Ok(receipt)
    }

    pub(crate) fn raw_get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.raw_get_versioned(key)?.map(|v| v.value))
    }

    pub(crate) fn raw_get_versioned(&self, key: &str) -> Result<Option<VersionedValue>, LedgerError> {
        ensure_key(key)?;
        Ok(self.store.get(key)?)
    }

    /// The write that produced `version` of `key`, if the key got that far.
    pub(crate) fn written_at(
        &self,
        key: &str,
        version: u64,
    ) -> Result<Option<KeyModification>, LedgerError> {
        ensure_key(key)?;
        for modification in self.store.history(key)? {
            let modification = modification?;
            if modification.version == version {
                return Ok(Some(modification));
            }
        }
        Ok(None)
    }

    /// Number of writes (including tombstones) made to `key`.
    pub(crate) fn raw_version(&self, key: &str) -> Result<u64, LedgerError> {
        ensure_key(key)?;
        Ok(self.store.version(key)?)
    }

    pub(crate) fn raw_delete(
        &self,
        key: &str,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, LedgerError> {
        Ok(self.store.delete(key, expected)?)
    }

    /// Load and decode a typed record.
    ///
    /// An absent or unreadable record is `NotFound`; a readable record that
    /// breaks a domain rule (e.g. an unparsable rule amount) is `Validation`.
    pub fn load<T: WireFormat>(&self, key: &str) -> Result<Versioned<T>, LedgerError> {
        ensure_key(key)?;
        let asset = T::ASSET_TYPE;
        let stored = self
            .store
            .get(key)?
            .ok_or_else(|| LedgerError::not_found(format!("{asset} {key} does not exist")))?;
        debug!(key, version = stored.version, %asset, "record loaded");

        match codec::decode::<T>(&stored.value) {
            Ok(value) => Ok(Versioned {
                value,
                version: stored.version,
            }),
            Err(CodecError::Malformed { reason, .. }) => Err(LedgerError::not_found(format!(
                "{asset} {key} is undecodable: {reason}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_order(&self, order_id: &str) -> Result<Versioned<Order>, LedgerError> {
        self.load(order_id)
    }

    pub fn load_account(&self, account_id: &str) -> Result<Versioned<Account>, LedgerError> {
        self.load(account_id)
    }

    /// Encode and write a typed record under its own id.
    pub fn save<T: WireFormat + Entity>(
        &self,
        value: &T,
        expected: ExpectedVersion,
    ) -> Result<WriteReceipt, LedgerError> {
        let bytes = codec::encode(value)?;
        let receipt = self.store.put(value.key(), bytes, expected)?;
        debug!(key = value.key(), version = receipt.version, "record saved");
        Ok(receipt)
    }
}

fn ensure_key(key: &str) -> Result<(), LedgerError> {
    if key.trim().is_empty() {
        return Err(LedgerError::validation("key must not be blank"));
    }
    Ok(())
}

//! Status-triggered fund transfers.
//!
//! Updating an order's status may move money between two account records and
//! always rewrites the order record. The store has no multi-key transaction,
//! so the engine runs the update as an ordered saga around a transfer receipt
//! keyed by `(order id, order version)`:
//!
//! ```text
//! read order, customer (and operator if a rule matches)
//!   ↓
//! write receipt: Pending, listing every planned account write
//!   ↓
//! write customer account      (version-checked)
//!   ↓
//! write operator account      (version-checked)
//!   ↓
//! write receipt: Committed    ← transfer committed
//!   ↓
//! write order with new status (version-checked)
//! ```
//!
//! Every planned write names the version it must land on and the exact bytes
//! it writes, so whether it happened can be read back from the account's
//! history. That makes an interrupted transfer recoverable by any caller.
//!
//! ## Failure semantics
//!
//! - A failure before the receipt is committed unwinds the transfer: the
//!   receipt is marked Unwinding, each account write that landed is reverted
//!   by a planned compensating write, and only then is the receipt removed.
//!   The original error is returned.
//! - If the unwind itself cannot finish, the error is `PartialCommit` and the
//!   receipt stays behind, listed under the order's stalled transfer key.
//!   The next call for that order finishes the unwind before doing anything
//!   else, even if the order version moved on, so a retry never moves funds
//!   twice.
//! - Unwinding a receipt someone else wrote first burns the versions its
//!   pending writes were planned for, so an in-flight caller cannot land them.
//! - If the order write fails for a storage reason after the commit, the
//!   error is `PartialCommit`; re-invoking with the same status finds the
//!   committed receipt, skips the transfer and only persists the status.
//! - If the order write fails because the order changed concurrently, the
//!   transfer is unwound and the error is `Conflict`, unless the change was a
//!   concurrent re-drive that already persisted the requested status.
//! - Re-invoking with the status the order already has is a no-op.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use shipledger_assets::codec;
use shipledger_assets::{Account, Order, RuleMatch};
use shipledger_core::{AssetId, DomainResult, ExpectedVersion};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::ledger_store::LedgerStore;
use crate::registry::{AssetRegistry, Versioned};

/// Funds moved by a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTransfer {
    #[serde(rename = "Customer")]
    pub customer: AssetId,
    #[serde(rename = "Operator")]
    pub operator: AssetId,
    #[serde(rename = "Amount")]
    pub amount: Decimal,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Leg {
    Debit,
    Credit,
}

impl Leg {
    pub fn inverse(self) -> Self {
        match self {
            Leg::Debit => Leg::Credit,
            Leg::Credit => Leg::Debit,
        }
    }

    fn apply(self, account: &mut Account, amount: Decimal) -> DomainResult<()> {
        match self {
            Leg::Debit => account.debit(amount),
            Leg::Credit => account.credit(amount),
        }
    }
}

/// An account write decided before it is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedWrite {
    #[serde(rename = "Account")]
    pub account: AssetId,
    #[serde(rename = "Leg")]
    pub leg: Leg,
    /// Version the account must be at; the write lands as `expected_version + 1`.
    #[serde(rename = "ExpectedVersion")]
    pub expected_version: u64,
    /// Exact encoded account the write stores.
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    /// Index of the reverted write in [`TransferReceipt::writes`].
    #[serde(rename = "Reverts")]
    pub reverts: usize,
    #[serde(rename = "Write")]
    pub write: PlannedWrite,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptState {
    Pending,
    Committed,
    Unwinding,
}

/// Durable record of the transfer for one order version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    #[serde(rename = "OrderId")]
    pub order_id: AssetId,
    #[serde(rename = "OrderVersion")]
    pub order_version: u64,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "State")]
    pub state: ReceiptState,
    #[serde(rename = "Transfer")]
    pub transfer: AppliedTransfer,
    #[serde(rename = "Writes", default)]
    pub writes: Vec<PlannedWrite>,
    #[serde(rename = "Compensations", default)]
    pub compensations: Vec<Compensation>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Status (and transfer, if any) applied by this call.
    Applied,
    /// An earlier call committed the transfer; this call persisted the status.
    Redriven,
    /// The order already had the requested status.
    Unchanged,
}

/// Result of [`TransactionEngine::update_order_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub order_id: AssetId,
    pub previous_status: String,
    pub status: String,
    pub transfer: Option<AppliedTransfer>,
    pub outcome: ChangeOutcome,
}

/// A receipt as last written by this call, with its store version.
type HeldReceipt = (TransferReceipt, u64);

pub struct TransactionEngine<S> {
    registry: AssetRegistry<S>,
    rule_match: RuleMatch,
    receipt_prefix: String,
}

impl<S> TransactionEngine<S> {
    pub fn new(registry: AssetRegistry<S>, config: &LedgerConfig) -> Self {
        Self {
            registry,
            rule_match: config.rule_match,
            receipt_prefix: config.receipt_prefix.clone(),
        }
    }

    pub fn registry(&self) -> &AssetRegistry<S> {
        &self.registry
    }

    pub fn rule_match(&self) -> RuleMatch {
        self.rule_match
    }

    pub fn receipt_key(&self, order_id: &AssetId, order_version: u64) -> String {
        format!("{}{order_id}@{order_version}", self.receipt_prefix)
    }

    /// Key listing receipts of the order whose unwind stalled. Receipt keys
    /// end in a version number, so the two never collide.
    pub fn stalled_key(&self, order_id: &AssetId) -> String {
        format!("{}{order_id}@stalled", self.receipt_prefix)
    }
}

impl<S: LedgerStore> TransactionEngine<S> {
    /// Move the order to `new_status`, applying the matching transfer rule.
    #[instrument(skip(self), fields(rule_match = ?self.rule_match))]
    pub fn update_order_status(
        &self,
        order_id: &str,
        new_status: &str,
    ) -> Result<StatusChange, LedgerError> {
        let Versioned {
            value: order,
            version: order_version,
        } = self.registry.load_order(order_id)?;
        let mut customer = self.registry.load_account(order.customer.as_str())?;

        if order.has_status(new_status) {
            debug!("order already in requested status");
            return Ok(StatusChange {
                order_id: order.id.clone(),
                previous_status: order.status.clone(),
                status: order.status,
                transfer: None,
                outcome: ChangeOutcome::Unchanged,
            });
        }

        if self.unwind_stale(&order.id)? {
            customer = self.registry.load_account(order.customer.as_str())?;
        }

        let receipt_key = self.receipt_key(&order.id, order_version);
        if let Some((receipt, version)) = self.find_receipt(&receipt_key)? {
            match receipt.state {
                ReceiptState::Committed if receipt.status == new_status => {
                    warn!(
                        receipt = %receipt_key,
                        "transfer already committed for this order version; persisting status only"
                    );
                    let transfer = Some(receipt.transfer);
                    return self.persist_status(
                        order,
                        order_version,
                        new_status,
                        transfer,
                        ChangeOutcome::Redriven,
                        None,
                    );
                }
                ReceiptState::Committed => {
                    return Err(LedgerError::Conflict(format!(
                        "order {} has a committed transfer for status '{}' whose status update \
                         is pending; re-drive that status first",
                        order.id, receipt.status
                    )));
                }
                ReceiptState::Pending | ReceiptState::Unwinding => {
                    warn!(
                        receipt = %receipt_key,
                        state = ?receipt.state,
                        "unwinding interrupted transfer"
                    );
                    self.unwind(&receipt_key, receipt, version, None)?;
                    customer = self.registry.load_account(order.customer.as_str())?;
                }
            }
        }

        let Some(rule) = order.rule_for(new_status, self.rule_match) else {
            debug!("no transfer rule for status");
            return self.persist_status(
                order,
                order_version,
                new_status,
                None,
                ChangeOutcome::Applied,
                None,
            );
        };
        let amount = rule.amount;
        let operator = self
            .registry
            .load_account(rule.operator_account_id.as_str())?;

        let held =
            self.commit_transfer(&order, order_version, new_status, amount, customer, operator)?;
        let transfer = Some(held.0.transfer.clone());
        self.persist_status(
            order,
            order_version,
            new_status,
            transfer,
            ChangeOutcome::Applied,
            Some(held),
        )
    }

    /// Write the order with its new status. `held` is the receipt this call
    /// committed, if any; it is unwound when the order moved on under us.
    fn persist_status(
        &self,
        order: Order,
        order_version: u64,
        new_status: &str,
        transfer: Option<AppliedTransfer>,
        outcome: ChangeOutcome,
        held: Option<HeldReceipt>,
    ) -> Result<StatusChange, LedgerError> {
        let previous_status = order.status.clone();
        let updated = order.with_status(new_status);

        if let Err(err) = self
            .registry
            .save(&updated, ExpectedVersion::Exact(order_version))
        {
            let conflict = matches!(err, LedgerError::Conflict(_));
            match held {
                Some(_)
                    if conflict
                        && self.settled_by_peer(updated.id.as_str(), order_version, new_status) =>
                {
                    warn!("status persisted by a concurrent re-drive of this transfer");
                }
                Some((receipt, version)) if conflict => {
                    // The transfer belongs to an order version that no longer exists.
                    let key = self.receipt_key(&updated.id, order_version);
                    let landed = receipt.writes.len();
                    self.unwind(&key, receipt, version, Some(landed))?;
                    return Err(err);
                }
                _ if conflict || transfer.is_none() => return Err(err),
                _ => {
                    warn!(error = %err, "transfer committed but order status not persisted");
                    return Err(LedgerError::PartialCommit(format!(
                        "transfer committed but order status was not persisted ({err}); \
                         re-invoke with the same status to complete"
                    )));
                }
            }
        }

        info!(
            from = %previous_status,
            to = new_status,
            transfer = transfer.is_some(),
            ?outcome,
            "order status changed"
        );

        Ok(StatusChange {
            order_id: updated.id,
            previous_status,
            status: updated.status,
            transfer,
            outcome,
        })
    }

    /// Record the planned writes, make them, then mark the transfer committed.
    fn commit_transfer(
        &self,
        order: &Order,
        order_version: u64,
        status: &str,
        amount: Decimal,
        customer: Versioned<Account>,
        operator: Versioned<Account>,
    ) -> Result<HeldReceipt, LedgerError> {
        let key = self.receipt_key(&order.id, order_version);

        // A self-transfer nets to zero; only the receipt is written.
        let writes = if customer.value.id == operator.value.id {
            Vec::new()
        } else {
            vec![
                self.plan(&customer, Leg::Debit, amount)?,
                self.plan(&operator, Leg::Credit, amount)?,
            ]
        };

        let mut receipt = TransferReceipt {
            order_id: order.id.clone(),
            order_version,
            status: status.to_string(),
            state: ReceiptState::Pending,
            transfer: AppliedTransfer {
                customer: customer.value.id,
                operator: operator.value.id,
                amount,
            },
            writes,
            compensations: Vec::new(),
        };

        // An unwound transfer leaves a tombstone behind; write on top of it,
        // but never over a live receipt.
        let base = self.registry.raw_version(&key)?;
        if self.registry.raw_get(&key)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "transfer {key} was started by another caller"
            )));
        }
        let version = self.write_receipt(&key, &receipt, base)?;

        for (landed, write) in receipt.writes.iter().enumerate() {
            if let Err(err) = self.execute(write) {
                return Err(self.abort(&key, receipt, version, landed, err));
            }
        }

        receipt.state = ReceiptState::Committed;
        let version = match self.write_receipt(&key, &receipt, version) {
            Ok(version) => version,
            Err(err) => {
                receipt.state = ReceiptState::Pending;
                let landed = receipt.writes.len();
                return Err(self.abort(&key, receipt, version, landed, err));
            }
        };

        info!(
            customer = %receipt.transfer.customer,
            operator = %receipt.transfer.operator,
            %amount,
            "transfer committed"
        );
        Ok((receipt, version))
    }

    /// Unwind after `cause`, with the first `landed` writes made. The caller
    /// sees `cause` if the unwind finished.
    fn abort(
        &self,
        key: &str,
        receipt: TransferReceipt,
        version: u64,
        landed: usize,
        cause: LedgerError,
    ) -> LedgerError {
        match self.unwind(key, receipt, version, Some(landed)) {
            Ok(()) => cause,
            Err(err) => err,
        }
    }

    /// Revert every account write of `receipt` that landed and is not yet
    /// reverted, then remove the receipt.
    ///
    /// `known` is how many writes the caller made itself, when it owns the
    /// transfer. Otherwise what landed is read back from account history and
    /// the versions of writes that have not landed are burned first, so a
    /// caller still making them cannot.
    ///
    /// A stalled unwind is recorded under the order's stalled transfer list so
    /// it is found again after the order version moves on.
    fn unwind(
        &self,
        key: &str,
        receipt: TransferReceipt,
        version: u64,
        known: Option<usize>,
    ) -> Result<(), LedgerError> {
        let order_id = receipt.order_id.clone();
        let result = self.revert(key, receipt, version, known);
        if let Err(LedgerError::PartialCommit(_)) = &result {
            if let Err(err) = self.remember_stalled(&order_id, key) {
                error!(receipt = key, error = %err, "failed to record stalled transfer");
            }
        }
        result
    }

    fn revert(
        &self,
        key: &str,
        mut receipt: TransferReceipt,
        version: u64,
        known: Option<usize>,
    ) -> Result<(), LedgerError> {
        let fence = known.is_none();
        receipt.state = ReceiptState::Unwinding;
        let mut version = self
            .write_receipt(key, &receipt, version)
            .map_err(|e| claim_lost(key, e))?;

        let mut landed = Vec::with_capacity(receipt.writes.len());
        for (index, write) in receipt.writes.iter().enumerate() {
            let made = match known {
                Some(count) => index < count,
                None => self.settle(write, fence).map_err(|e| stalled(key, e))?,
            };
            landed.push(made);
        }
        for comp in &receipt.compensations {
            if self.settle(&comp.write, fence).map_err(|e| stalled(key, e))? {
                if let Some(flag) = landed.get_mut(comp.reverts) {
                    *flag = false;
                }
            }
        }

        let amount = receipt.transfer.amount;
        let mut planned = Vec::new();
        for (index, write) in receipt.writes.iter().enumerate() {
            if landed[index] {
                let account = self
                    .registry
                    .load_account(write.account.as_str())
                    .map_err(|e| stalled(key, e))?;
                let inverse = self
                    .plan(&account, write.leg.inverse(), amount)
                    .map_err(|e| stalled(key, e))?;
                planned.push(Compensation {
                    reverts: index,
                    write: inverse,
                });
            }
        }

        if !planned.is_empty() {
            receipt.compensations.extend(planned.iter().cloned());
            version = self
                .write_receipt(key, &receipt, version)
                .map_err(|e| claim_lost(key, e))?;

            for comp in planned.iter().rev() {
                self.execute(&comp.write).map_err(|e| stalled(key, e))?;
                warn!(account = %comp.write.account, receipt = key, "reverted transfer write");
            }
        }

        self.registry
            .raw_delete(key, ExpectedVersion::Exact(version))
            .map_err(|e| stalled(key, e))?;
        warn!(receipt = key, reverted = planned.len(), "transfer unwound");
        Ok(())
    }

    /// Whether `write` landed. With `fence`, a write that has not landed but
    /// still could is made impossible by burning its expected version.
    fn settle(&self, write: &PlannedWrite, fence: bool) -> Result<bool, LedgerError> {
        let key = write.account.as_str();
        loop {
            if self.landed(write)? {
                return Ok(true);
            }
            if !fence || self.registry.raw_version(key)? != write.expected_version {
                return Ok(false);
            }

            let expected = ExpectedVersion::Exact(write.expected_version);
            let burned = match self.registry.raw_get_versioned(key)? {
                Some(current) => self.registry.raw_put(key, current.value, expected),
                None => self.registry.raw_delete(key, expected),
            };
            match burned {
                Ok(_) => {
                    debug!(
                        account = key,
                        version = write.expected_version,
                        "burned planned version"
                    );
                    return Ok(false);
                }
                // Something landed first; look again.
                Err(LedgerError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn landed(&self, write: &PlannedWrite) -> Result<bool, LedgerError> {
        Ok(self
            .registry
            .written_at(write.account.as_str(), write.expected_version + 1)?
            .is_some_and(|m| m.value.as_deref() == Some(write.value.as_bytes())))
    }

    fn plan(
        &self,
        account: &Versioned<Account>,
        leg: Leg,
        amount: Decimal,
    ) -> Result<PlannedWrite, LedgerError> {
        let mut next = account.value.clone();
        leg.apply(&mut next, amount)?;
        let value = String::from_utf8(codec::encode(&next)?)
            .map_err(|e| LedgerError::persistence(format!("account encoding is not UTF-8: {e}")))?;
        Ok(PlannedWrite {
            account: next.id,
            leg,
            expected_version: account.version,
            value,
        })
    }

    fn execute(&self, write: &PlannedWrite) -> Result<(), LedgerError> {
        self.registry.raw_put(
            write.account.as_str(),
            write.value.clone().into_bytes(),
            ExpectedVersion::Exact(write.expected_version),
        )?;
        Ok(())
    }

    /// Write `receipt` over `version`, returning the new version.
    fn write_receipt(
        &self,
        key: &str,
        receipt: &TransferReceipt,
        version: u64,
    ) -> Result<u64, LedgerError> {
        let bytes = serde_json::to_vec(receipt)
            .map_err(|e| LedgerError::persistence(format!("failed to encode receipt: {e}")))?;
        Ok(self
            .registry
            .raw_put(key, bytes, ExpectedVersion::Exact(version))?
            .version)
    }

    /// Finish unwinds that stalled earlier, wherever the order version has
    /// moved since. Returns whether any were found.
    fn unwind_stale(&self, order_id: &AssetId) -> Result<bool, LedgerError> {
        let marker = self.stalled_key(order_id);
        let Some(stored) = self.registry.raw_get_versioned(&marker)? else {
            return Ok(false);
        };
        let keys: Vec<String> = serde_json::from_slice(&stored.value).map_err(|e| {
            LedgerError::persistence(format!("stalled transfer list '{marker}' is corrupt: {e}"))
        })?;

        let mut found = false;
        for key in &keys {
            if let Some((receipt, version)) = self.find_receipt(key)? {
                if receipt.state != ReceiptState::Committed {
                    warn!(receipt = %key, state = ?receipt.state, "unwinding stalled transfer");
                    self.unwind(key, receipt, version, None)?;
                    found = true;
                }
            }
        }

        // A stall recorded meanwhile bumps the version and survives.
        if let Err(err) = self
            .registry
            .raw_delete(&marker, ExpectedVersion::Exact(stored.version))
        {
            debug!(error = %err, "stalled transfer list changed; keeping it");
        }
        Ok(found)
    }

    /// Record `receipt_key` under the order's stalled transfer list.
    fn remember_stalled(&self, order_id: &AssetId, receipt_key: &str) -> Result<(), LedgerError> {
        let marker = self.stalled_key(order_id);
        loop {
            let version = self.registry.raw_version(&marker)?;
            let mut keys: Vec<String> = match self.registry.raw_get(&marker)? {
                Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                    LedgerError::persistence(format!(
                        "stalled transfer list '{marker}' is corrupt: {e}"
                    ))
                })?,
                None => Vec::new(),
            };
            if keys.iter().any(|k| k == receipt_key) {
                return Ok(());
            }
            keys.push(receipt_key.to_string());

            let bytes = serde_json::to_vec(&keys).map_err(|e| {
                LedgerError::persistence(format!("failed to encode stalled transfer list: {e}"))
            })?;
            match self
                .registry
                .raw_put(&marker, bytes, ExpectedVersion::Exact(version))
            {
                Ok(_) => return Ok(()),
                Err(LedgerError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn find_receipt(&self, key: &str) -> Result<Option<HeldReceipt>, LedgerError> {
        self.registry
            .raw_get_versioned(key)?
            .map(|stored| {
                serde_json::from_slice(&stored.value)
                    .map(|receipt| (receipt, stored.version))
                    .map_err(|e| {
                        LedgerError::persistence(format!("transfer receipt '{key}' is corrupt: {e}"))
                    })
            })
            .transpose()
    }

    /// Whether another caller re-drove our receipt and persisted the status.
    fn settled_by_peer(&self, order_id: &str, order_version: u64, status: &str) -> bool {
        self.registry
            .load_order(order_id)
            .map(|current| current.version == order_version + 1 && current.value.has_status(status))
            .unwrap_or(false)
    }
}

fn claim_lost(key: &str, err: LedgerError) -> LedgerError {
    match err {
        LedgerError::Conflict(_) => {
            LedgerError::Conflict(format!("transfer {key} is being resolved by another caller"))
        }
        other => stalled(key, other),
    }
}

fn stalled(key: &str, cause: LedgerError) -> LedgerError {
    error!(receipt = key, error = %cause, "unwind stalled");
    LedgerError::PartialCommit(format!(
        "transfer {key} is partially unwound ({cause}); re-invoke to finish it"
    ))
}

impl<S> core::fmt::Debug for TransactionEngine<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("rule_match", &self.rule_match)
            .field("receipt_prefix", &self.receipt_prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use shipledger_assets::TransferRule;
    use crate::error::ErrorKind;
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::test_support::{FailingStore, Failure};

    fn id(s: &str) -> AssetId {
        AssetId::new(s).unwrap()
    }

    fn engine_with<S: LedgerStore>(store: S, config: LedgerConfig) -> TransactionEngine<S> {
        TransactionEngine::new(AssetRegistry::new(store), &config)
    }

    fn engine() -> TransactionEngine<InMemoryLedgerStore> {
        engine_with(InMemoryLedgerStore::new(), LedgerConfig::default())
    }

    fn seed_account<S: LedgerStore>(engine: &TransactionEngine<S>, key: &str, balance: Decimal) {
        engine
            .registry()
            .save(&Account::new(id(key), balance), ExpectedVersion::Any)
            .unwrap();
    }

    fn seed_order<S: LedgerStore>(
        engine: &TransactionEngine<S>,
        key: &str,
        customer: &str,
        rules: Vec<TransferRule>,
    ) {
        let order = Order {
            id: id(key),
            container: "C1".to_string(),
            customer: id(customer),
            content: "coffee".to_string(),
            destination: "Hamburg".to_string(),
            status: "Created".to_string(),
            transfer_rules: rules,
        };
        engine.registry().save(&order, ExpectedVersion::Any).unwrap();
    }

    fn rule(status: &str, operator: &str, amount: Decimal) -> TransferRule {
        TransferRule::new(status, id(operator), amount).unwrap()
    }

    fn balance<S: LedgerStore>(engine: &TransactionEngine<S>, key: &str) -> Decimal {
        engine.registry().load::<Account>(key).unwrap().value.balance
    }

    fn status<S: LedgerStore>(engine: &TransactionEngine<S>, key: &str) -> String {
        engine.registry().load::<Order>(key).unwrap().value.status
    }

    #[test]
    fn matching_rule_moves_funds_and_sets_status() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);

        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(change.outcome, ChangeOutcome::Applied);
        assert_eq!(change.previous_status, "Created");
        assert_eq!(
            change.transfer,
            Some(AppliedTransfer {
                customer: id("A1"),
                operator: id("A2"),
                amount: dec!(30),
            })
        );

        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
        assert_eq!(status(&engine, "O1"), "Shipped");
    }

    #[test]
    fn status_without_rule_changes_only_status() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(5));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);

        let change = engine.update_order_status("O1", "Loaded").unwrap();
        assert!(change.transfer.is_none());
        assert_eq!(balance(&engine, "A1"), dec!(100));
        assert_eq!(balance(&engine, "A2"), dec!(5));
        assert_eq!(status(&engine, "O1"), "Loaded");
        assert_eq!(engine.registry().store().version("A1").unwrap(), 1);
    }

    #[test]
    fn first_match_policy_applies_earliest_rule() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_account(&engine, "A3", dec!(0));
        seed_order(
            &engine,
            "O1",
            "A1",
            vec![rule("Shipped", "A2", dec!(10)), rule("Shipped", "A3", dec!(20))],
        );

        engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(balance(&engine, "A2"), dec!(10));
        assert_eq!(balance(&engine, "A3"), dec!(0));
        assert_eq!(balance(&engine, "A1"), dec!(90));
    }

    #[test]
    fn last_match_policy_applies_final_rule() {
        let engine = engine_with(
            InMemoryLedgerStore::new(),
            LedgerConfig::default().with_rule_match(RuleMatch::Last),
        );
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_account(&engine, "A3", dec!(0));
        seed_order(
            &engine,
            "O1",
            "A1",
            vec![rule("Shipped", "A2", dec!(10)), rule("Shipped", "A3", dec!(20))],
        );

        engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(balance(&engine, "A2"), dec!(0));
        assert_eq!(balance(&engine, "A3"), dec!(20));
        assert_eq!(balance(&engine, "A1"), dec!(80));
    }

    #[test]
    fn missing_order_fails_and_leaves_store_untouched() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));

        let err = engine.update_order_status("O404", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(engine.registry().store().keys().unwrap(), vec!["A1".to_string()]);
        assert_eq!(engine.registry().store().version("A1").unwrap(), 1);
    }

    #[test]
    fn missing_customer_or_operator_is_not_found() {
        let engine = engine();
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        assert_eq!(
            engine.update_order_status("O1", "Shipped").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        seed_account(&engine, "A1", dec!(100));
        assert_eq!(
            engine.update_order_status("O1", "Shipped").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(balance(&engine, "A1"), dec!(100));
        assert_eq!(status(&engine, "O1"), "Created");
    }

    #[test]
    fn undecodable_order_is_not_found_but_bad_amount_is_validation() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        engine.registry().raw_write("O1", b"{broken".to_vec()).unwrap();
        assert_eq!(
            engine.update_order_status("O1", "Shipped").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        engine
            .registry()
            .raw_write(
                "O2",
                br#"{"OrderId":"O2","Container":"C1","Customer":"A1","Content":"",
                    "Destination":"","Status":"Created",
                    "DefinedTransactions":[["Shipped","A2","3O"]]}"#
                    .to_vec(),
            )
            .unwrap();
        assert_eq!(
            engine.update_order_status("O2", "Shipped").unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(balance(&engine, "A1"), dec!(100));
    }

    #[test]
    fn repeating_current_status_is_a_no_op() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);

        engine.update_order_status("O1", "Shipped").unwrap();
        let again = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(again.outcome, ChangeOutcome::Unchanged);
        assert!(again.transfer.is_none());
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
    }

    #[test]
    fn status_can_cycle_and_rule_reapplies_on_each_entry() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);

        engine.update_order_status("O1", "Shipped").unwrap();
        engine.update_order_status("O1", "Returned").unwrap();
        engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(balance(&engine, "A1"), dec!(40));
        assert_eq!(balance(&engine, "A2"), dec!(60));
    }

    #[test]
    fn self_transfer_nets_to_zero() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A1", dec!(30))]);

        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert!(change.transfer.is_some());
        assert_eq!(balance(&engine, "A1"), dec!(100));
        assert_eq!(status(&engine, "O1"), "Shipped");
    }

    #[test]
    fn receipt_is_written_under_order_version() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);

        engine.update_order_status("O1", "Shipped").unwrap();
        let bytes = engine
            .registry()
            .raw_read(&engine.receipt_key(&id("O1"), 1))
            .unwrap();
        let receipt: TransferReceipt = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(receipt.order_version, 1);
        assert_eq!(receipt.status, "Shipped");
        assert_eq!(receipt.state, ReceiptState::Committed);
        assert_eq!(receipt.transfer.amount, dec!(30));

        let legs: Vec<_> = receipt
            .writes
            .iter()
            .map(|w| (w.account.as_str(), w.leg, w.expected_version))
            .collect();
        assert_eq!(legs, vec![("A1", Leg::Debit, 1), ("A2", Leg::Credit, 1)]);
        assert!(receipt.compensations.is_empty());
    }

    #[test]
    fn operator_write_failure_restores_customer() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        engine.registry().store().fail_puts("A2", Failure::Backend);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(balance(&engine, "A1"), dec!(100));
        assert_eq!(balance(&engine, "A2"), dec!(0));
        assert_eq!(status(&engine, "O1"), "Created");
        // debit + compensation
        assert_eq!(engine.registry().store().version("A1").unwrap(), 3);
    }

    #[test]
    fn unwritable_receipt_touches_no_account() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        let receipt_key = engine.receipt_key(&id("O1"), 1);
        engine.registry().store().fail_puts(&receipt_key, Failure::Backend);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(balance(&engine, "A1"), dec!(100));
        assert_eq!(balance(&engine, "A2"), dec!(0));
        assert_eq!(engine.registry().store().version("A1").unwrap(), 1);
        assert_eq!(engine.registry().store().version("A2").unwrap(), 1);
        assert_eq!(status(&engine, "O1"), "Created");
    }

    #[test]
    fn interrupted_commit_is_unwound_on_retry() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        // The pending receipt lands; marking it committed does not.
        let receipt_key = engine.receipt_key(&id("O1"), 1);
        engine
            .registry()
            .store()
            .fail_puts_after(&receipt_key, 1, Failure::Backend);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialCommit);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));

        engine.registry().store().clear_failures();
        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(change.outcome, ChangeOutcome::Applied);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
        assert_eq!(status(&engine, "O1"), "Shipped");
    }

    #[test]
    fn failed_status_write_is_redriven_without_double_transfer() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        engine.registry().store().fail_puts("O1", Failure::Backend);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialCommit);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(status(&engine, "O1"), "Created");

        // A different status cannot jump the pending one.
        engine.registry().store().clear_failures();
        let err = engine.update_order_status("O1", "Delivered").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(change.outcome, ChangeOutcome::Redriven);
        assert_eq!(change.transfer.unwrap().amount, dec!(30));
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
        assert_eq!(status(&engine, "O1"), "Shipped");
    }

    #[test]
    fn concurrent_order_change_unwinds_transfer() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        engine.registry().store().fail_puts("O1", Failure::Conflict);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(balance(&engine, "A1"), dec!(100));
        assert_eq!(balance(&engine, "A2"), dec!(0));
        let receipt_key = engine.receipt_key(&id("O1"), 1);
        assert!(engine.registry().raw_get(&receipt_key).unwrap().is_none());

        // Retrying once the conflict clears applies the transfer exactly once.
        engine.registry().store().clear_failures();
        engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
    }

    #[test]
    fn stale_customer_version_is_a_conflict_with_nothing_applied() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        engine.registry().store().fail_puts("A1", Failure::Conflict);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(balance(&engine, "A1"), dec!(100));
        assert_eq!(balance(&engine, "A2"), dec!(0));
        assert_eq!(status(&engine, "O1"), "Created");
    }

    #[test]
    fn failed_compensation_reports_partial_commit() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        // First write to A1 succeeds, the restore does not.
        engine.registry().store().fail_puts_after("A1", 1, Failure::Backend);
        engine.registry().store().fail_puts("A2", Failure::Backend);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialCommit);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(0));

        let receipt_key = engine.receipt_key(&id("O1"), 1);
        let (receipt, _) = engine.find_receipt(&receipt_key).unwrap().unwrap();
        assert_eq!(receipt.state, ReceiptState::Unwinding);
        assert_eq!(receipt.compensations.len(), 1);

        // The retry finishes restoring A1 before transferring afresh.
        engine.registry().store().clear_failures();
        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(change.outcome, ChangeOutcome::Applied);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
        assert_eq!(status(&engine, "O1"), "Shipped");
        let (receipt, _) = engine.find_receipt(&receipt_key).unwrap().unwrap();
        assert_eq!(receipt.state, ReceiptState::Committed);
        assert!(receipt.compensations.is_empty());
    }

    #[test]
    fn stalled_unwind_after_order_conflict_is_finished_on_retry() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        engine.registry().store().fail_puts("O1", Failure::Conflict);
        // The credit lands; reverting it does not.
        engine.registry().store().fail_puts_after("A2", 1, Failure::Backend);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialCommit);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));

        engine.registry().store().clear_failures();
        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(change.outcome, ChangeOutcome::Applied);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
        assert_eq!(status(&engine, "O1"), "Shipped");

        let again = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(again.outcome, ChangeOutcome::Unchanged);
        assert_eq!(balance(&engine, "A1"), dec!(70));
    }

    #[test]
    fn unwind_left_under_an_older_order_version_is_finished() {
        let engine = engine_with(FailingStore::new(), LedgerConfig::default());
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);
        engine.registry().store().fail_puts("O1", Failure::Conflict);
        engine.registry().store().fail_puts_after("A2", 1, Failure::Backend);

        let err = engine.update_order_status("O1", "Shipped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialCommit);
        let stalled_key = engine.stalled_key(&id("O1"));
        let listed = engine.registry().raw_read(&stalled_key).unwrap();
        let listed: Vec<String> = serde_json::from_slice(&listed).unwrap();
        assert_eq!(listed, vec![engine.receipt_key(&id("O1"), 1)]);

        // Someone rewrites the order before the caller retries.
        engine.registry().store().clear_failures();
        let order = engine.registry().load_order("O1").unwrap().value;
        engine.registry().save(&order, ExpectedVersion::Exact(1)).unwrap();

        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(change.outcome, ChangeOutcome::Applied);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
        let stale_key = engine.receipt_key(&id("O1"), 1);
        assert!(engine.find_receipt(&stale_key).unwrap().is_none());
        assert!(engine.registry().raw_get(&stalled_key).unwrap().is_none());
    }

    #[test]
    fn resolving_a_pending_receipt_fences_its_writes() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(100));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Shipped", "A2", dec!(30))]);

        // Another caller recorded its plan but has made none of the writes.
        let customer = engine.registry().load_account("A1").unwrap();
        let operator = engine.registry().load_account("A2").unwrap();
        let debit = engine.plan(&customer, Leg::Debit, dec!(30)).unwrap();
        let credit = engine.plan(&operator, Leg::Credit, dec!(30)).unwrap();
        let receipt = TransferReceipt {
            order_id: id("O1"),
            order_version: 1,
            status: "Shipped".to_string(),
            state: ReceiptState::Pending,
            transfer: AppliedTransfer {
                customer: id("A1"),
                operator: id("A2"),
                amount: dec!(30),
            },
            writes: vec![debit.clone(), credit.clone()],
            compensations: Vec::new(),
        };
        let receipt_key = engine.receipt_key(&id("O1"), 1);
        engine.write_receipt(&receipt_key, &receipt, 0).unwrap();

        let change = engine.update_order_status("O1", "Shipped").unwrap();
        assert_eq!(change.outcome, ChangeOutcome::Applied);
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));

        // The other caller wakes up: its writes can no longer land.
        for stale in [&debit, &credit] {
            assert_eq!(engine.execute(stale).unwrap_err().kind(), ErrorKind::Conflict);
        }
        assert_eq!(balance(&engine, "A1"), dec!(70));
        assert_eq!(balance(&engine, "A2"), dec!(30));
    }

    #[test]
    fn encoded_accounts_stay_canonical_after_transfer() {
        let engine = engine();
        seed_account(&engine, "A1", dec!(10.05));
        seed_account(&engine, "A2", dec!(0));
        seed_order(&engine, "O1", "A1", vec![rule("Paid", "A2", dec!(0.05))]);

        engine.update_order_status("O1", "Paid").unwrap();
        let raw = engine.registry().raw_read("A1").unwrap();
        let decoded: Account = codec::decode(&raw).unwrap();
        assert_eq!(decoded.balance, dec!(10.00));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a transfer conserves the combined balance and debits the
        /// customer by exactly the rule amount.
        #[test]
        fn transfer_conserves_combined_balance(
            customer_cents in -1_000_000_000i64..1_000_000_000i64,
            operator_cents in -1_000_000_000i64..1_000_000_000i64,
            amount_cents in 0i64..1_000_000_000i64,
        ) {
            let engine = engine();
            let customer_before = Decimal::new(customer_cents, 2);
            let operator_before = Decimal::new(operator_cents, 2);
            let amount = Decimal::new(amount_cents, 2);
            seed_account(&engine, "C", customer_before);
            seed_account(&engine, "P", operator_before);
            seed_order(&engine, "O", "C", vec![rule("Shipped", "P", amount)]);

            engine.update_order_status("O", "Shipped").unwrap();

            let customer_after = balance(&engine, "C");
            let operator_after = balance(&engine, "P");
            prop_assert_eq!(customer_after + operator_after, customer_before + operator_before);
            prop_assert_eq!(customer_after, customer_before - amount);
        }
    }
}

use core::str::FromStr;

use rust_decimal::Decimal;

use shipledger_core::{AssetId, DomainError, DomainResult, Entity, ValueObject};

/// A payment obligation attached to an order: when the order reaches
/// `trigger_status`, `amount` moves from the customer to the operator account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRule {
    pub trigger_status: String,
    pub operator_account_id: AssetId,
    pub amount: Decimal,
}

impl TransferRule {
    pub fn new(
        trigger_status: impl Into<String>,
        operator_account_id: AssetId,
        amount: Decimal,
    ) -> DomainResult<Self> {
        let trigger_status = trigger_status.into();
        if trigger_status.trim().is_empty() {
            return Err(DomainError::validation("transfer rule trigger status must not be blank"));
        }
        if amount < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "transfer rule amount must not be negative (got {amount})"
            )));
        }
        Ok(Self {
            trigger_status,
            operator_account_id,
            amount,
        })
    }

    pub fn is_triggered_by(&self, status: &str) -> bool {
        self.trigger_status == status
    }
}

impl ValueObject for TransferRule {}

/// Which rule wins when several rules share the same trigger status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RuleMatch {
    /// Scan in order and stop at the first matching rule.
    #[default]
    First,
    /// Scan every rule and keep the last match.
    Last,
}

impl RuleMatch {
    pub fn select<'a>(self, rules: &'a [TransferRule], status: &str) -> Option<&'a TransferRule> {
        let mut matching = rules.iter().filter(|r| r.is_triggered_by(status));
        match self {
            RuleMatch::First => matching.next(),
            RuleMatch::Last => matching.last(),
        }
    }
}

impl FromStr for RuleMatch {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(RuleMatch::First),
            "last" => Ok(RuleMatch::Last),
            other => Err(DomainError::validation(format!(
                "rule match must be one of: first, last (got '{other}')"
            ))),
        }
    }
}

/// A shipment order.
///
/// `transfer_rules` is fixed when the order is created and travels with the
/// order record; only `status` changes through status updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: AssetId,
    pub container: String,
    pub customer: AssetId,
    pub content: String,
    pub destination: String,
    pub status: String,
    pub transfer_rules: Vec<TransferRule>,
}

impl Order {
    pub fn rule_for(&self, status: &str, policy: RuleMatch) -> Option<&TransferRule> {
        policy.select(&self.transfer_rules, status)
    }

    pub fn has_status(&self, status: &str) -> bool {
        self.status == status
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
}

impl Entity for Order {
    fn id(&self) -> &AssetId {
        &self.id
    }
}

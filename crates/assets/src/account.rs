use rust_decimal::Decimal;

use shipledger_core::{AssetId, DomainError, DomainResult, Entity};

/// A monetary account holding a single decimal balance.
///
/// Balances are not floored at zero: a customer may be debited below zero by
/// a transfer rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AssetId,
    pub balance: Decimal,
}

impl Account {
    pub fn new(id: AssetId, balance: Decimal) -> Self {
        Self { id, balance }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Subtract `amount` from the balance.
    pub fn debit(&mut self, amount: Decimal) -> DomainResult<()> {
        self.balance = self.balance.checked_sub(amount).ok_or_else(|| {
            DomainError::validation(format!("debit of {amount} overflows account {}", self.id))
        })?;
        Ok(())
    }

    /// Add `amount` to the balance.
    pub fn credit(&mut self, amount: Decimal) -> DomainResult<()> {
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            DomainError::validation(format!("credit of {amount} overflows account {}", self.id))
        })?;
        Ok(())
    }
}

impl Entity for Account {
    fn id(&self) -> &AssetId {
        &self.id
    }
}

//! Configuration loading and representation.

use shipledger_assets::RuleMatch;

pub const DEFAULT_OWNER_KEY: &str = "LedgerOwner";
pub const DEFAULT_RECEIPT_PREFIX: &str = "~transfer/";

/// Ledger configuration, fixed at construction and passed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Key the `init` operation stores the owner marker under.
    pub owner_key: String,
    /// Key prefix of transfer receipts written by the transaction engine.
    pub receipt_prefix: String,
    /// Which transfer rule applies when several share a trigger status.
    pub rule_match: RuleMatch,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            owner_key: DEFAULT_OWNER_KEY.to_string(),
            receipt_prefix: DEFAULT_RECEIPT_PREFIX.to_string(),
            rule_match: RuleMatch::default(),
        }
    }
}

impl LedgerConfig {
    /// Read `SHIPLEDGER_OWNER_KEY`, `SHIPLEDGER_RECEIPT_PREFIX` and
    /// `SHIPLEDGER_RULE_MATCH` from the environment, defaulting anything unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(key) = lookup("SHIPLEDGER_OWNER_KEY").filter(|v| !v.trim().is_empty()) {
            config.owner_key = key;
        }
        if let Some(prefix) = lookup("SHIPLEDGER_RECEIPT_PREFIX").filter(|v| !v.trim().is_empty()) {
            config.receipt_prefix = prefix;
        }
        if let Some(raw) = lookup("SHIPLEDGER_RULE_MATCH") {
            match raw.parse::<RuleMatch>() {
                Ok(policy) => config.rule_match = policy,
                Err(e) => tracing::warn!(
                    value = %raw,
                    error = %e,
                    "invalid SHIPLEDGER_RULE_MATCH; using default"
                ),
            }
        }

        config
    }

    pub fn with_owner_key(mut self, key: impl Into<String>) -> Self {
        self.owner_key = key.into();
        self
    }

    pub fn with_receipt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.receipt_prefix = prefix.into();
        self
    }

    pub fn with_rule_match(mut self, rule_match: RuleMatch) -> Self {
        self.rule_match = rule_match;
        self
    }
}

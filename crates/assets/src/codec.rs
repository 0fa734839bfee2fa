//! Textual wire representation of assets.
//!
//! Decoding is two-phase: bytes are first parsed into a plain wire record
//! (`serde_json`), then the record is validated into the typed entity. The two
//! phases fail differently ([`CodecError::Malformed`] vs
//! [`CodecError::Invalid`]) so callers can tell an unreadable record from a
//! readable record that breaks a domain rule.
//!
//! Field names follow the established payload format:
//!
//! | Asset | Fields |
//! |---|---|
//! | Order | `OrderId, Container, Customer, Content, Destination, Status, DefinedTransactions` |
//! | Account | `AccountId, Balance` |
//! | Container | `ContainerId, Owner` |
//!
//! A transfer rule is encoded as a `[status, operatorAccountId, amount]` row.
//! Decoding also accepts `{"TriggerStatus", "OperatorAccountId", "Amount"}`
//! objects, and drops all-blank padding rows.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use shipledger_core::{AssetId, DomainError, DomainResult};

use crate::{Account, Asset, AssetType, Container, Order, TransferRule};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The bytes are not a readable record of the expected shape.
    #[error("malformed {asset} payload: {reason}")]
    Malformed { asset: &'static str, reason: String },

    /// The record was readable but violates a domain rule.
    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error("failed to encode {asset}: {reason}")]
    Encode { asset: &'static str, reason: String },
}

/// Mapping between a typed entity and its wire record.
pub trait WireFormat: Sized {
    const ASSET_TYPE: AssetType;

    type Record: Serialize + DeserializeOwned;

    fn to_record(&self) -> Self::Record;

    fn from_record(record: Self::Record) -> DomainResult<Self>;
}

/// Decode bytes into a typed entity.
pub fn decode<T: WireFormat>(bytes: &[u8]) -> Result<T, CodecError> {
    let record: T::Record = serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed {
        asset: T::ASSET_TYPE.as_str(),
        reason: e.to_string(),
    })?;
    Ok(T::from_record(record)?)
}

/// Encode a typed entity into its canonical wire bytes.
pub fn encode<T: WireFormat>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&value.to_record()).map_err(|e| CodecError::Encode {
        asset: T::ASSET_TYPE.as_str(),
        reason: e.to_string(),
    })
}

impl Asset {
    /// Decode `bytes` as the given asset type.
    pub fn decode(asset_type: AssetType, bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(match asset_type {
            AssetType::Order => Asset::Order(decode(bytes)?),
            AssetType::Account => Asset::Account(decode(bytes)?),
            AssetType::Container => Asset::Container(decode(bytes)?),
        })
    }

    /// Decode `bytes` whose asset type is not known up front, by looking at
    /// which identifier field the record carries.
    pub fn detect(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed {
                asset: "asset",
                reason: e.to_string(),
            })?;
        let Some(obj) = value.as_object() else {
            return Err(CodecError::Malformed {
                asset: "asset",
                reason: "expected a JSON object".to_string(),
            });
        };

        let asset_type = if obj.contains_key("OrderId") {
            AssetType::Order
        } else if obj.contains_key("AccountId") {
            AssetType::Account
        } else if obj.contains_key("ContainerId") {
            AssetType::Container
        } else {
            return Err(CodecError::Malformed {
                asset: "asset",
                reason: "no OrderId, AccountId or ContainerId field".to_string(),
            });
        };

        Self::decode(asset_type, bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Asset::Order(o) => encode(o),
            Asset::Account(a) => encode(a),
            Asset::Container(c) => encode(c),
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(rename = "AccountId")]
    pub id: String,
    #[serde(rename = "Balance", deserialize_with = "exact_decimal")]
    pub balance: Decimal,
}

impl WireFormat for Account {
    const ASSET_TYPE: AssetType = AssetType::Account;

    type Record = AccountRecord;

    fn to_record(&self) -> AccountRecord {
        AccountRecord {
            id: self.id.to_string(),
            balance: self.balance,
        }
    }

    fn from_record(record: AccountRecord) -> DomainResult<Self> {
        Ok(Account::new(AssetId::new(record.id)?, record.balance))
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    #[serde(rename = "ContainerId")]
    pub id: String,
    #[serde(rename = "Owner")]
    pub owner: String,
}

impl WireFormat for Container {
    const ASSET_TYPE: AssetType = AssetType::Container;

    type Record = ContainerRecord;

    fn to_record(&self) -> ContainerRecord {
        ContainerRecord {
            id: self.id.to_string(),
            owner: self.owner.clone(),
        }
    }

    fn from_record(record: ContainerRecord) -> DomainResult<Self> {
        Ok(Container::new(AssetId::new(record.id)?, record.owner))
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(rename = "OrderId")]
    pub id: String,
    #[serde(rename = "Container")]
    pub container: String,
    #[serde(rename = "Customer")]
    pub customer: String,
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "DefinedTransactions", default)]
    pub defined_transactions: Option<Vec<RuleRecord>>,
}

/// One transfer rule on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleRecord {
    Row(Vec<String>),
    Entry {
        #[serde(rename = "TriggerStatus")]
        trigger_status: String,
        #[serde(rename = "OperatorAccountId")]
        operator_account_id: String,
        #[serde(rename = "Amount")]
        amount: AmountRecord,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountRecord {
    Text(String),
    Number(serde_json::Number),
}

impl AmountRecord {
    /// The literal as written. Numbers keep every digit (`arbitrary_precision`).
    fn text(&self) -> String {
        match self {
            AmountRecord::Text(s) => s.trim().to_string(),
            AmountRecord::Number(n) => n.to_string(),
        }
    }

    fn parse(&self, index: usize) -> DomainResult<Decimal> {
        let text = self.text();
        parse_decimal(&text).ok_or_else(|| {
            DomainError::validation(format!(
                "transfer rule {index}: amount '{text}' is not a decimal"
            ))
        })
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// A balance given as a JSON number or string, decoded without a float step.
fn exact_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    let text = AmountRecord::deserialize(deserializer)?.text();
    parse_decimal(&text)
        .ok_or_else(|| D::Error::custom(format!("balance '{text}' is not a decimal")))
}

impl RuleRecord {
    /// Validate into a typed rule; `Ok(None)` for a blank padding row.
    fn into_rule(self, index: usize) -> DomainResult<Option<TransferRule>> {
        let (status, operator, amount) = match self {
            RuleRecord::Row(cells) => {
                if cells.iter().all(|c| c.trim().is_empty()) {
                    return Ok(None);
                }
                let [status, operator, amount]: [String; 3] =
                    cells.try_into().map_err(|cells: Vec<String>| {
                        DomainError::validation(format!(
                            "transfer rule {index}: expected 3 columns, found {}",
                            cells.len()
                        ))
                    })?;
                (status, operator, AmountRecord::Text(amount))
            }
            RuleRecord::Entry {
                trigger_status,
                operator_account_id,
                amount,
            } => (trigger_status, operator_account_id, amount),
        };

        let operator = AssetId::new(operator).map_err(|_| {
            DomainError::validation(format!("transfer rule {index}: operator account is blank"))
        })?;
        let amount = amount.parse(index)?;
        TransferRule::new(status, operator, amount).map(Some)
    }
}

impl WireFormat for Order {
    const ASSET_TYPE: AssetType = AssetType::Order;

    type Record = OrderRecord;

    fn to_record(&self) -> OrderRecord {
        let rows = self
            .transfer_rules
            .iter()
            .map(|r| {
                RuleRecord::Row(vec![
                    r.trigger_status.clone(),
                    r.operator_account_id.to_string(),
                    r.amount.to_string(),
                ])
            })
            .collect();

        OrderRecord {
            id: self.id.to_string(),
            container: self.container.clone(),
            customer: self.customer.to_string(),
            content: self.content.clone(),
            destination: self.destination.clone(),
            status: self.status.clone(),
            defined_transactions: Some(rows),
        }
    }

    fn from_record(record: OrderRecord) -> DomainResult<Self> {
        let id = AssetId::new(record.id)?;
        let customer = AssetId::new(record.customer)
            .map_err(|_| DomainError::validation(format!("order {id}: customer is blank")))?;

        let mut transfer_rules = Vec::new();
        for (index, rule) in record
            .defined_transactions
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            if let Some(rule) = rule.into_rule(index)? {
                transfer_rules.push(rule);
            }
        }

        Ok(Order {
            id,
            container: record.container,
            customer,
            content: record.content,
            destination: record.destination,
            status: record.status,
            transfer_rules,
        })
    }
}

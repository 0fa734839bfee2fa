use core::str::FromStr;

use shipledger_core::{AssetId, DomainError, Entity};

use crate::{Account, Container, Order};

/// Tag naming one of the three asset shapes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AssetType {
    Order,
    Account,
    Container,
}

impl AssetType {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetType::Order => "Order",
            AssetType::Account => "Account",
            AssetType::Container => "Container",
        }
    }
}

impl core::fmt::Display for AssetType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "order" => Ok(AssetType::Order),
            "account" => Ok(AssetType::Account),
            "container" => Ok(AssetType::Container),
            _ => Err(DomainError::validation(format!(
                "asset type must be one of: Order, Account, Container (got '{s}')"
            ))),
        }
    }
}

/// Any storable asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    Order(Order),
    Account(Account),
    Container(Container),
}

impl Asset {
    pub fn asset_type(&self) -> AssetType {
        match self {
            Asset::Order(_) => AssetType::Order,
            Asset::Account(_) => AssetType::Account,
            Asset::Container(_) => AssetType::Container,
        }
    }

    pub fn as_order(&self) -> Option<&Order> {
        match self {
            Asset::Order(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_account(&self) -> Option<&Account> {
        match self {
            Asset::Account(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Asset::Container(c) => Some(c),
            _ => None,
        }
    }
}

impl Entity for Asset {
    fn id(&self) -> &AssetId {
        match self {
            Asset::Order(o) => o.id(),
            Asset::Account(a) => a.id(),
            Asset::Container(c) => c.id(),
        }
    }
}

impl From<Order> for Asset {
    fn from(value: Order) -> Self {
        Asset::Order(value)
    }
}

impl From<Account> for Asset {
    fn from(value: Account) -> Self {
        Asset::Account(value)
    }
}

impl From<Container> for Asset {
    fn from(value: Container) -> Self {
        Asset::Container(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn asset_type_parses_known_tags_only() {
        assert_eq!("Order".parse::<AssetType>().unwrap(), AssetType::Order);
        assert_eq!("account".parse::<AssetType>().unwrap(), AssetType::Account);
        assert_eq!("CONTAINER".parse::<AssetType>().unwrap(), AssetType::Container);
        assert!(matches!(
            "Truck".parse::<AssetType>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn asset_exposes_inner_id_and_type() {
        let asset = Asset::from(Account::new(AssetId::new("A1").unwrap(), dec!(1)));
        assert_eq!(asset.asset_type(), AssetType::Account);
        assert_eq!(asset.key(), "A1");
        assert!(asset.as_account().is_some());
        assert!(asset.as_order().is_none());
    }
}

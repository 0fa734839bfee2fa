use shipledger_core::{AssetId, Entity};

/// A shipping container. `owner` is a free reference to an account or an
/// external party; it is never resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: AssetId,
    pub owner: String,
}

impl Container {
    pub fn new(id: AssetId, owner: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
        }
    }
}

impl Entity for Container {
    fn id(&self) -> &AssetId {
        &self.id
    }
}

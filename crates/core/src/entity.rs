//! Entity trait: identity + continuity across state changes.

use crate::id::AssetId;

/// Entity marker + minimal interface.
///
/// A ledger entity is stored under its own identifier, so the id doubles as
/// the store key.
pub trait Entity {
    /// Returns the entity identifier.
    fn id(&self) -> &AssetId;

    /// Store key the entity lives under.
    fn key(&self) -> &str {
        self.id().as_str()
    }
}

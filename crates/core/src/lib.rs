//! `shipledger-core`: foundation building blocks shared by every ledger crate.
//!
//! This crate contains **pure** primitives (no storage or IO concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AssetId, TxId};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;

//! Ledger assets: accounts, containers and orders with their transfer rules.
//!
//! Pure domain logic only: no IO, no persistence concerns. The [`codec`]
//! module owns the textual wire representation of every asset.

pub mod account;
pub mod asset;
pub mod codec;
pub mod container;
pub mod order;

pub use account::Account;
pub use asset::{Asset, AssetType};
pub use codec::{CodecError, WireFormat};
pub use container::Container;
pub use order::{Order, RuleMatch, TransferRule};

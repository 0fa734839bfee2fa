//! Process-wide tracing setup shared by the ledger binaries.

/// Install the default subscriber (JSON to stderr, `RUST_LOG` filter).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber construction (filters, formats).
pub mod tracing;

pub use crate::tracing::LogFormat;

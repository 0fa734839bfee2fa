//! Terminal error of every ledger operation.

use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use shipledger_assets::CodecError;
use shipledger_core::DomainError;

use crate::ledger_store::StoreError;

/// Stable, machine-readable error kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Persistence,
    Conflict,
    UnknownOperation,
    PartialCommit,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Conflict => "conflict",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::PartialCommit => "partial_commit",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed arguments or payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record is absent (or unreadable).
    #[error("not found: {0}")]
    NotFound(String),

    /// The underlying store failed a read or write.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A concurrent writer changed a record first; nothing was left applied.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The dispatch name is not recognized.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Some writes of a multi-record update are committed and could not be
    /// undone yet. Re-invoking the same operation finishes or unwinds them
    /// before it does anything else.
    #[error("partially committed: {0}")]
    PartialCommit(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Persistence(_) => ErrorKind::Persistence,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            LedgerError::PartialCommit(_) => ErrorKind::PartialCommit,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LedgerError::Validation(m)
            | LedgerError::NotFound(m)
            | LedgerError::Persistence(m)
            | LedgerError::Conflict(m)
            | LedgerError::UnknownOperation(m)
            | LedgerError::PartialCommit(m) => m,
        }
    }

    /// Structured `(kind, message)` rendering for callers.
    pub fn to_json(&self) -> JsonValue {
        json!({
            "error": self.kind(),
            "message": self.message(),
        })
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::Conflict(msg),
            StoreError::Backend(msg) => LedgerError::Persistence(msg),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::NotFound(msg) => LedgerError::NotFound(msg),
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
        }
    }
}

impl From<CodecError> for LedgerError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::Malformed { .. } => LedgerError::Validation(value.to_string()),
            CodecError::Invalid(e) => e.into(),
            CodecError::Encode { .. } => LedgerError::Persistence(value.to_string()),
        }
    }
}

//! Error types for ledger operations.

/// Errors raised by the ledgers and their storage seam.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A chain failed verification. Fatal to the affected ledger.
    #[error("Integrity failure at index {index}: {reason}")]
    Integrity { index: u64, reason: String },

    /// A record could not be serialized for hashing or storage
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The attached chain store rejected an operation
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Build an integrity failure for the given position.
    pub fn integrity(index: u64, reason: impl Into<String>) -> Self {
        Self::Integrity {
            index,
            reason: reason.into(),
        }
    }

    /// Whether this error means the chain itself can no longer be trusted.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

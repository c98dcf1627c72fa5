//! Error types for constitution operations.

use audit_ledger::LedgerError;

/// Errors raised by the store, the gates and the publisher.
///
/// A rejected decision or protocol trigger is a [`Verdict`](crate::Verdict)
/// or [`ProtocolDecision`](crate::ProtocolDecision), never an error.
#[derive(Debug, thiserror::Error)]
pub enum ConstitutionError {
    /// Hash or signature mismatch. The store stays failed.
    #[error("Constitution integrity failure: {0}")]
    Integrity(String),

    /// Malformed input
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Constitution {id} version {version} is already published")]
    AlreadyPublished { id: String, version: String },

    #[error("No constitution loaded")]
    NotLoaded,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ConstitutionError {
    /// Whether this is an integrity failure, from the constitution or a ledger.
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::Integrity(_) => true,
            Self::Ledger(err) => err.is_integrity(),
            _ => false,
        }
    }

    /// Whether this is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownProtocol(_))
    }
}

pub type Result<T> = std::result::Result<T, ConstitutionError>;

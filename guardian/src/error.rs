//! Error types for the guardian runtime.

use audit_ledger::LedgerError;
use constitution::ConstitutionError;

/// Errors raised by the tracker, aggregator, notifier and kernel.
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    /// A ledger chain or the constitution failed verification
    #[error("Integrity failure: {0}")]
    Integrity(String),

    /// Malformed input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Every channel in the selected set failed
    #[error("Notification failed on {channel}: {reason}")]
    NotificationFailed { channel: String, reason: String },

    #[error("Constitution error: {0}")]
    Constitution(#[from] ConstitutionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GuardianError {
    /// Whether this is an integrity failure anywhere in the stack.
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::Integrity(_) => true,
            Self::Constitution(err) => err.is_integrity(),
            Self::Ledger(err) => err.is_integrity(),
            _ => false,
        }
    }

    /// Whether this is a validation failure anywhere in the stack.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Constitution(err) => err.is_validation(),
            _ => false,
        }
    }
}

impl From<serde_yaml::Error> for GuardianError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GuardianError>;

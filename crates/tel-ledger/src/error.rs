use tel_crypto::{HashError, SignatureError};
use tel_types::{ChainScope, TypeError};

/// Errors produced by ledger operations.
///
/// A failed verification is not an error: it is reported as data in a
/// [`VerificationReport`](crate::VerificationReport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Payload could not be canonicalized. Fatal to the append.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("chain scope not found: {0}")]
    ScopeNotFound(ChainScope),

    #[error("entry not found: scope {scope}, sequence {sequence}")]
    EntryNotFound { scope: ChainScope, sequence: u64 },

    /// Append contention. Retryable by the caller with backoff.
    #[error("timed out after {waited_ms}ms waiting for the append lock on scope {scope}")]
    LockTimeout { scope: ChainScope, waited_ms: u64 },

    /// Storage-level corruption found outside the normal verify flow.
    /// Requires operator intervention.
    #[error("chain integrity violation in scope {scope}: {reason}")]
    ChainIntegrity { scope: ChainScope, reason: String },

    #[error("invalid sequence range: from={from}, to={to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),
}

impl LedgerError {
    /// Returns `true` for unknown scope or sequence errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ScopeNotFound(_) | Self::EntryNotFound { .. })
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<TypeError> for LedgerError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::Serialization(msg) => Self::Serialization(msg),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

impl From<HashError> for LedgerError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

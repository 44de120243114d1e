use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid digest encoding: {0}")]
    InvalidDigest(String),

    #[error("invalid chain scope: {0}")]
    InvalidScope(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

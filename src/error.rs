//! Error handling for the proof-of-work core
//!
//! One variant per failure the mining and validation paths can surface, plus
//! the I/O and configuration errors of the surrounding node.

use crate::chain::LinkFault;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for proof-of-work operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// No transactions were available for a mined block
    #[error("no transactions to mine")]
    EmptyBatch,

    /// The deadline elapsed before any worker found a valid nonce
    #[error("proof-of-work not found within {elapsed:?}")]
    ProofTimeout { elapsed: Duration },

    /// Every worker ran off the end of the u64 nonce space
    #[error("nonce space exhausted without a valid proof")]
    NonceSpaceExhausted,

    /// Hash recomputation or previous-hash linkage failed during validation
    #[error("chain broken at block {index}: {fault}")]
    ChainLinkBroken { index: u64, fault: LinkFault },

    /// A serialized buffer could not be parsed
    #[error("malformed serialization: {message}")]
    MalformedSerialization { message: String },

    /// A difficulty or compact-bits value is outside the representable range
    #[error("invalid difficulty encoding: {message}")]
    InvalidDifficultyEncoding { message: String },

    /// The search was cancelled from outside before a winner was found
    #[error("operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// A search thread could not be spawned or panicked
    #[error("worker error: {message}")]
    Worker { message: String },

    /// A transaction with the same fingerprint is already pooled
    #[error("duplicate transaction: {fingerprint}")]
    DuplicateTransaction { fingerprint: String },

    /// Persistence lookup miss
    #[error("block not found: {hash}")]
    BlockNotFound { hash: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a serialization error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSerialization {
            message: message.into(),
        }
    }

    /// Create a difficulty encoding error
    pub fn difficulty(message: impl Into<String>) -> Self {
        Self::InvalidDifficultyEncoding {
            message: message.into(),
        }
    }

    /// Create a chain link error
    pub fn link(index: u64, fault: LinkFault) -> Self {
        Self::ChainLinkBroken { index, fault }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a worker error
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Create a duplicate-transaction error
    pub fn duplicate(fingerprint: impl Into<String>) -> Self {
        Self::DuplicateTransaction {
            fingerprint: fingerprint.into(),
        }
    }

    /// Create a not-found error for a block hash
    pub fn not_found(hash: impl Into<String>) -> Self {
        Self::BlockNotFound { hash: hash.into() }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the caller may retry with adjusted parameters
    ///
    /// Nothing inside the core retries on its own; this only tells the outer
    /// loop which failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EmptyBatch | Error::ProofTimeout { .. } | Error::Io(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::EmptyBatch => "empty_batch",
            Error::ProofTimeout { .. } => "proof_timeout",
            Error::NonceSpaceExhausted => "nonce_exhausted",
            Error::ChainLinkBroken { .. } => "chain_link",
            Error::MalformedSerialization { .. } => "serialization",
            Error::InvalidDifficultyEncoding { .. } => "difficulty",
            Error::Cancelled { .. } => "cancelled",
            Error::Worker { .. } => "worker",
            Error::DuplicateTransaction { .. } => "duplicate",
            Error::BlockNotFound { .. } => "not_found",
            Error::Config { .. } => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::EmptyBatch.is_retryable());
        assert!(Error::ProofTimeout {
            elapsed: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!Error::link(3, LinkFault::HashMismatch).is_retryable());
        assert!(!Error::malformed("short").is_retryable());
        assert!(!Error::duplicate("ab").is_retryable());
    }

    #[test]
    fn test_display_includes_index() {
        let err = Error::link(4, LinkFault::PrevHashMismatch);
        let message = err.to_string();
        assert!(message.contains("block 4"));
        assert_eq!(err.category(), "chain_link");
    }
}

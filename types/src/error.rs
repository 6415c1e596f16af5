//! Top-level error type shared across crates.

use thiserror::Error;

/// Errors raised while constructing or parsing fundamental types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid identifier: expected {expected} bytes, got {actual}")]
    InvalidIdentifier { expected: usize, actual: usize },

    #[error("invalid base58 string: {0}")]
    InvalidBase58(String),

    #[error("invalid routable address: {0}")]
    InvalidAddress(String),
}

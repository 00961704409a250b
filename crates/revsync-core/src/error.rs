//! Error types for revsync core.

use thiserror::Error;

/// Core errors raised by primitives and backend implementations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The analysis backend rejected or failed an operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// A content hash string was not 64 hex characters.
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    /// Reading the binary failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

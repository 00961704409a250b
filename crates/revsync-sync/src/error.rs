//! Error types for the sync module.

use thiserror::Error;

use revsync_core::{ContentHash, CoreError};

/// Errors that can occur while routing sync traffic.
///
/// None of these are fatal to the session: each one means "this one update
/// is lost".
#[derive(Debug, Error)]
pub enum SyncError {
    /// Message failed shape validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Message key, or the recomputed binary hash, does not match the session.
    #[error("identity mismatch: session={session:?}, message={message}")]
    IdentityMismatch {
        session: Option<ContentHash>,
        message: String,
    },

    /// `cmd` is not one this engine understands.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// No channel is joined.
    #[error("not joined to a channel")]
    NotJoined,

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Payload could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The analysis backend failed.
    #[error("backend error: {0}")]
    Backend(#[from] CoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

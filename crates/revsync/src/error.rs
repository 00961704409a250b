//! Error types for the engine.

use revsync_core::CoreError;
use revsync_sync::SyncError;
use thiserror::Error;

/// Errors surfaced through the engine handle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The engine task has stopped.
    #[error("engine is not running")]
    Closed,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

//! Unified error types for recall.
//!
//! Every variant renders as `CODE: message` so callers can surface a stable
//! machine-readable prefix alongside the human text.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the cache and coordination layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty namespace).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A producer returned a tagged failure or raised an error.
    #[error("GENERATION_FAILED: {0}")]
    GenerationFailure(String),

    /// A durable or ephemeral store could not be reached.
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),

    /// Database operation failed.
    #[error("STORE_UNAVAILABLE: {0}")]
    Database(tokio_rusqlite::Error),

    /// Filesystem operation failed.
    #[error("STORE_UNAVAILABLE: {0}")]
    Io(#[from] std::io::Error),

    /// A stored or produced document could not be (de)serialized.
    #[error("SERIALIZATION_FAILED: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration failed to apply.
    #[error("STORE_UNAVAILABLE: migration failed: {0}")]
    MigrationFailed(String),

    /// Another holder owns the lock.
    #[error("LOCK_CONTENTION: {key} is held by another owner")]
    LockContention { key: String },

    /// Text index setup failed.
    #[error("INDEX_CREATION_FAILED: {0}")]
    IndexCreationFailure(String),

    /// The job queue no longer accepts work.
    #[error("JOB_QUEUE_CLOSED: {0}")]
    JobQueueClosed(String),
}

impl Error {
    /// True for I/O style failures of either store tier.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Database(_) | Error::Io(_) | Error::MigrationFailed(_)
        )
    }

    /// True when the error reports lock contention.
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::LockContention { .. })
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::GenerationFailure(_) => -32000,
            Error::StoreUnavailable(_) | Error::Database(_) | Error::Io(_) | Error::MigrationFailed(_) => -32002,
            Error::Serialization(_) => -32003,
            Error::LockContention { .. } => -32004,
            Error::IndexCreationFailure(_) => -32005,
            Error::JobQueueClosed(_) => -32006,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

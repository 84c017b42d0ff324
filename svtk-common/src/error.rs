//! Common error types for SVTK

use thiserror::Error;

/// Common result type for SVTK operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the session tracker
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload or session context (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid hook input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures caused by a missing table or a busy/locked database.
    ///
    /// These are logged as warnings and retried lazily on the next request.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("no such table")
                    || msg.contains("database is locked")
                    || msg.contains("database is busy")
            }
            Error::Database(sqlx::Error::PoolTimedOut)
            | Error::Database(sqlx::Error::PoolClosed)
            | Error::Database(sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }
}

//! Storage-specific error types.
//!
//! All backend operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, pool, malformed row).

use thiserror::Error;

use crate::pool::PoolError;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Could not obtain a pooled connection.
    #[error("pool error [{code}]: {0}", code = .0.code())]
    Pool(#[from] PoolError),

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid data in database (e.g., unknown type code).
    #[error("invalid data: {0}")]
    InvalidData(String),
}

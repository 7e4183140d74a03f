//! Query error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors returned by history queries.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed request (empty window, bad percentile, ...).
    #[error("invalid query: {0}")]
    Validation(String),

    /// The series is neither enabled nor registered in the backend.
    #[error("unknown series '{0}'")]
    UnknownSeries(String),

    /// Backend fetch failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

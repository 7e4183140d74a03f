//! Facade error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::container::ContainerError;
use crate::ingest::IngestError;
use crate::query::QueryError;
use crate::storage::StorageError;

/// Errors returned by [`Historian`](super::Historian) operations.
#[derive(Debug, Error)]
pub enum HistorianError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Rejected series configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The engine actor is gone (shut down or panicked).
    #[error("engine is not running")]
    Closed,
}

//! Ingestion error types.

use thiserror::Error;

/// Errors returned when submitting samples.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// The sample carried no `val` field. `null` is accepted as a gap.
    #[error("sample value is undefined")]
    UndefinedValue,

    /// The series is not enabled.
    #[error("series '{0}' is not enabled")]
    UnknownSeries(String),

    /// The engine has shut down.
    #[error("engine channel closed")]
    ChannelClosed,
}

//! Pool-specific error types.

use thiserror::Error;

/// Errors returned by [`Pool`](super::Pool) and [`AdmissionGuard`](super::AdmissionGuard).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool has been closed.
    #[error("pool is not open")]
    NotOpen,

    /// All handles are borrowed and the exhaustion policy is `fail`.
    #[error("pool exhausted")]
    Exhausted,

    /// Waited `max_wait` for a free handle without success.
    #[error("timed out waiting for a pooled handle")]
    MaxWait,

    /// Could not produce a valid handle within `max_retries` attempts.
    #[error("could not obtain a valid handle: {0}")]
    Invalid(String),

    /// A return was attempted without a handle.
    #[error("null handle returned to pool")]
    NullReturned,

    /// More handles were returned than were borrowed.
    #[error("too many handles returned to pool")]
    TooManyReturned,

    /// `close()` was called while handles were still borrowed.
    #[error("pool closed with {0} handle(s) still borrowed")]
    ClosedWithActive(usize),

    /// The serial queue worker has stopped.
    #[error("serial queue closed")]
    QueueClosed,
}

impl PoolError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOpen => "POOL_NOT_OPEN",
            Self::Exhausted => "EXHAUSTED",
            Self::MaxWait => "MAX_WAIT",
            Self::Invalid(_) => "INVALID",
            Self::NullReturned => "NULL_RETURNED",
            Self::TooManyReturned => "TOO_MANY_RETURNED",
            Self::ClosedWithActive(_) => "CLOSED_WITH_ACTIVE",
            Self::QueueClosed => "QUEUE_CLOSED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PoolError::NotOpen.code(), "POOL_NOT_OPEN");
        assert_eq!(PoolError::Exhausted.code(), "EXHAUSTED");
        assert_eq!(PoolError::MaxWait.code(), "MAX_WAIT");
        assert_eq!(PoolError::Invalid("x".into()).code(), "INVALID");
        assert_eq!(PoolError::ClosedWithActive(1).code(), "CLOSED_WITH_ACTIVE");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            PoolError::ClosedWithActive(2).to_string(),
            "pool closed with 2 handle(s) still borrowed"
        );
    }
}

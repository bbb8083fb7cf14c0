//! Error types for the storage layer.

use thiserror::Error;

use crate::types::JournalState;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// A transaction lost a lock race (busy, timed out or asked to retry).
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A transient error kept recurring until the attempt budget ran out.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Store operation that was retried.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// The last error seen.
        last: String,
    },

    /// A state change that is not an edge of the row state machine.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State stored in the database.
        from: JournalState,
        /// Requested state.
        to: JournalState,
    },

    /// An argument could not be used, e.g. an out-of-range duration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the failed operation may succeed if simply run again.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match e.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                Self::Conflict(e.to_string())
            }
            _ => Self::Database(e.to_string()),
        }
    }
}

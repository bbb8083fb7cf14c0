//! Error types for the journal synchronizer.
//!
//! `SdnError` classifies controller client failures; `JournalError` is what
//! the workers and the daemon see.

use mlnx_sdn_core::CoreError;
use mlnx_sdn_store::StoreError;
use thiserror::Error;

/// A result type using `JournalError`.
pub type Result<T> = std::result::Result<T, JournalError>;

/// Errors returned by the controller REST client.
#[derive(Debug, Error)]
pub enum SdnError {
    /// The controller could not be reached (transport error or timeout).
    #[error("cannot connect to the SDN controller: {0}")]
    Connection(String),

    /// The controller rejected the credentials.
    #[error("SDN controller login failed with status {status}")]
    Login {
        /// HTTP status returned (401 or 403).
        status: u16,
    },

    /// The controller answered with an error status.
    #[error("SDN controller returned status {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The configured CA certificate is missing or unreadable.
    #[error("certificate error: {0}")]
    Cert(String),

    /// The client could not be built from the given options.
    #[error("client configuration error: {0}")]
    Config(String),
}

impl SdnError {
    /// Whether the controller itself is unreachable or refusing us, so that
    /// every other row would fail the same way.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Login { .. })
    }
}

impl From<reqwest::Error> for SdnError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Config(e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// Errors that can occur in the journal workers.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Controller client error.
    #[error("controller error: {0}")]
    Client(#[from] SdnError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] CoreError),

    /// A blocking store task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A maintenance operation failed.
    #[error("maintenance operation {operation} failed: {reason}")]
    Maintenance {
        /// Name of the failed operation.
        operation: String,
        /// What went wrong.
        reason: String,
    },
}

impl JournalError {
    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retriable(),
            Self::Client(e) => e.is_connectivity(),
            Self::Config(_) | Self::Task(_) | Self::Maintenance { .. } => false,
        }
    }
}

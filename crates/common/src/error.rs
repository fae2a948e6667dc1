//! Common error types for the proctoring monitor components.
//!
//! These are the failures reported by the external collaborators (stores and
//! the channel transport). Callers in the monitor decide how each one is
//! contained; none of them is fatal to an unrelated participant.

use thiserror::Error;

/// Errors returned by the roster, session and attempt stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store refused the write.
    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Errors returned by the channel transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The topic has no open channel (torn down or never joined).
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The publish call itself failed.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The subscription could not be established.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The transport did not answer in time.
    #[error("Transport timed out")]
    Timeout,
}

/// Result type alias for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

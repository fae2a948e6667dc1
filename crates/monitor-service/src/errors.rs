//! Monitor error types.
//!
//! Error types map to operator-facing error codes. Internal details are
//! logged server-side but not exposed to the operator UI.

use common::error::{StoreError, TransportError};
use common::types::SessionId;
use thiserror::Error;

/// Monitor error type.
///
/// Maps to operator-facing error codes:
/// - `InvalidWarning`: `INVALID_REQUEST` (1)
/// - `ViewNotFound`: `NOT_FOUND` (4)
/// - `Negotiation`: `UNAVAILABLE` (5)
/// - Store, Transport, Internal: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A store call failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A transport call failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Peer negotiation failed.
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// No monitoring view is open for the session.
    #[error("Monitoring view not found: {0}")]
    ViewNotFound(SessionId),

    /// Warning text failed validation.
    #[error("Invalid warning: {0}")]
    InvalidWarning(String),

    /// Too many monitoring views are open.
    #[error("Monitor at capacity")]
    CapacityExceeded,

    /// The monitor is shutting down.
    #[error("Monitor is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Peer link negotiation errors.
///
/// Every variant closes the pair and is shown to the operator as
/// "unavailable"; none of them is fatal to the view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The session description could not be applied.
    #[error("Malformed session description: {0}")]
    MalformedDescription(String),

    /// ICE gathering or connectivity checks failed.
    #[error("ICE failure")]
    IceFailed,

    /// A peer endpoint could not be created.
    #[error("Peer endpoint unavailable: {0}")]
    EndpointUnavailable(String),
}

impl MonitorError {
    /// Returns the operator-facing error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            MonitorError::InvalidWarning(_) => 1, // INVALID_REQUEST
            MonitorError::ViewNotFound(_) => 4,   // NOT_FOUND
            MonitorError::Negotiation(_) => 5,    // UNAVAILABLE
            MonitorError::Store(_) | MonitorError::Transport(_) | MonitorError::Internal(_) => {
                6 // INTERNAL_ERROR
            }
            MonitorError::CapacityExceeded | MonitorError::Draining => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            MonitorError::Store(_) | MonitorError::Transport(_) | MonitorError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            MonitorError::Negotiation(_) => "Participant video is unavailable".to_string(),
            MonitorError::ViewNotFound(_) => "Monitoring view not found".to_string(),
            MonitorError::InvalidWarning(reason) => format!("Invalid warning: {reason}"),
            MonitorError::CapacityExceeded => {
                "Too many sessions are being monitored, please try again".to_string()
            }
            MonitorError::Draining => "Monitor is shutting down".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(MonitorError::InvalidWarning("empty".to_string()).error_code(), 1);
        assert_eq!(MonitorError::ViewNotFound(SessionId::new()).error_code(), 4);
        assert_eq!(
            MonitorError::Negotiation(NegotiationError::IceFailed).error_code(),
            5
        );
        assert_eq!(
            MonitorError::Store(StoreError::Unavailable("timeout".to_string())).error_code(),
            6
        );
        assert_eq!(MonitorError::Transport(TransportError::Timeout).error_code(), 6);
        assert_eq!(MonitorError::CapacityExceeded.error_code(), 7);
        assert_eq!(MonitorError::Draining.error_code(), 7);
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = MonitorError::Store(StoreError::Unavailable(
            "postgres://proctor@db-7:5432 refused".to_string(),
        ));
        let msg = err.client_message();
        assert_eq!(msg, "An internal error occurred");
        assert!(!msg.contains("db-7"));

        let err = MonitorError::Negotiation(NegotiationError::MalformedDescription(
            "missing m= line".to_string(),
        ));
        assert!(!err.client_message().contains("m= line"));
    }

    #[test]
    fn test_from_conversions() {
        let err: MonitorError = TransportError::ChannelClosed("topic".to_string()).into();
        assert!(matches!(err, MonitorError::Transport(_)));

        let err: MonitorError = NegotiationError::IceFailed.into();
        assert!(matches!(err, MonitorError::Negotiation(NegotiationError::IceFailed)));
    }
}

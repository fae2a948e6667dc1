//! Warning dispatcher.
//!
//! Pushes a severity-tagged directive to exactly one participant. The
//! contract is "attempted", not "delivered": the caller learns only whether
//! the publish call succeeded. There is no retry, persistence or
//! acknowledgement.

use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::observability::metrics;
use chrono::Utc;
use common::transport::ChannelTransport;
use common::types::{ParticipantId, SessionId};
use monitor_protocol::{codec, Event, Severity, Topic, WarningMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Stateless dispatcher shared by every view.
pub struct WarningDispatcher {
    transport: Arc<dyn ChannelTransport>,
    publish_timeout: Duration,
    max_chars: usize,
}

impl WarningDispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn ChannelTransport>, config: &MonitorConfig) -> Self {
        Self {
            transport,
            publish_timeout: config.publish_timeout,
            max_chars: config.max_warning_chars,
        }
    }

    /// Send a warning. Returns whether the publish call succeeded.
    ///
    /// Each call is bounded by the publish timeout, so a hung channel for
    /// one participant cannot hold up warnings to others.
    pub async fn dispatch(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        message: &str,
        severity: Severity,
    ) -> bool {
        let message = match validate_warning(message, self.max_chars) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    target: "monitor.warning",
                    session_id = %session_id,
                    participant_id = %participant_id,
                    error = %e,
                    "Warning rejected before publish"
                );
                metrics::record_warning("rejected");
                return false;
            }
        };

        let payload = match codec::encode(&WarningMessage {
            session_id,
            participant_id,
            message,
            severity,
            sent_at: Utc::now(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "monitor.warning",
                    participant_id = %participant_id,
                    error = %e,
                    "Failed to encode warning"
                );
                metrics::record_warning("failed");
                return false;
            }
        };

        let topic = Topic::participant(session_id, participant_id);
        let publish = self
            .transport
            .publish(topic.as_str(), Event::Warning.as_str(), payload);

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {
                debug!(
                    target: "monitor.warning",
                    session_id = %session_id,
                    participant_id = %participant_id,
                    severity = severity.as_str(),
                    "Warning published"
                );
                metrics::record_warning("sent");
                true
            }
            Ok(Err(e)) => {
                warn!(
                    target: "monitor.warning",
                    session_id = %session_id,
                    participant_id = %participant_id,
                    error = %e,
                    "Warning publish failed"
                );
                metrics::record_warning("failed");
                false
            }
            Err(_) => {
                warn!(
                    target: "monitor.warning",
                    session_id = %session_id,
                    participant_id = %participant_id,
                    timeout_ms = self.publish_timeout.as_millis(),
                    "Warning publish timed out"
                );
                metrics::record_warning("timeout");
                false
            }
        }
    }
}

/// Trim and bound a warning message.
///
/// # Errors
///
/// Returns `MonitorError::InvalidWarning` if the trimmed message is empty
/// or longer than `max_chars` characters.
pub fn validate_warning(message: &str, max_chars: usize) -> Result<String, MonitorError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(MonitorError::InvalidWarning("message is empty".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > max_chars {
        return Err(MonitorError::InvalidWarning(format!(
            "message is {chars} characters (max {max_chars})"
        )));
    }
    Ok(trimmed.to_string())
}

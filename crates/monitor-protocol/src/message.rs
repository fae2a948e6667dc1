//! Payload types for every event.
//!
//! Signaling payloads are an internally tagged enum so a receiver can match
//! exhaustively and reject anything it does not recognise. The `type` tag
//! always equals the event name the payload was published under.

use crate::topic::Event;
use chrono::{DateTime, Utc};
use common::types::{ObserverId, ParticipantId, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A payload that can travel on a topic.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// The event name this payload is published under.
    fn event(&self) -> Event;
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// Why a peer link was closed.
///
/// The wire name, `Display` and metric label are the same string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Either side asked to close.
    Requested,
    /// Malformed description or ICE failure.
    NegotiationFailed,
    /// Subscription ended or a publish failed.
    TransportFailed,
    /// Tracks stopped being live while connected.
    MediaLost,
    /// Media did not start within the negotiation window.
    NegotiationTimeout,
    /// The monitoring view that owned the link was closed.
    ViewClosed,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CloseReason::Requested => "requested",
            CloseReason::NegotiationFailed => "negotiation_failed",
            CloseReason::TransportFailed => "transport_failed",
            CloseReason::MediaLost => "media_lost",
            CloseReason::NegotiationTimeout => "negotiation_timeout",
            CloseReason::ViewClosed => "view_closed",
        }
    }

    /// Whether the operator should see the participant as unavailable.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(self, CloseReason::Requested | CloseReason::ViewClosed)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer negotiation messages exchanged on the pair topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: IceCandidate },
    Close { reason: CloseReason },
}

impl WireMessage for SignalMessage {
    fn event(&self) -> Event {
        match self {
            SignalMessage::Offer { .. } => Event::Offer,
            SignalMessage::Answer { .. } => Event::Answer,
            SignalMessage::IceCandidate { .. } => Event::IceCandidate,
            SignalMessage::Close { .. } => Event::Close,
        }
    }
}

/// Asks the participant client to start offering to an observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub observer_id: ObserverId,
}

impl WireMessage for LinkRequest {
    fn event(&self) -> Event {
        Event::LinkRequest
    }
}

/// Warning severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// A directive pushed to one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningMessage {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub message: String,
    pub severity: Severity,
    pub sent_at: DateTime<Utc>,
}

impl WireMessage for WarningMessage {
    fn event(&self) -> Event {
        Event::Warning
    }
}

/// Still image carried by a frame, either inline or by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameImage {
    /// Base64 (standard alphabet) encoded image bytes.
    Inline { data: String },
    /// Reference to an image stored elsewhere.
    Uri { uri: String },
}

/// A still frame pushed by a participant client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub participant_id: ParticipantId,
    pub image: FrameImage,
    pub mime_type: String,
    pub captured_at: DateTime<Utc>,
}

impl WireMessage for FrameMessage {
    fn event(&self) -> Event {
        Event::Frame
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_tag_matches_event_name() {
        let candidate = SignalMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            },
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["type"], candidate.event().as_str());

        let close = SignalMessage::Close {
            reason: CloseReason::MediaLost,
        };
        let json = serde_json::to_value(&close).unwrap();
        assert_eq!(json["type"], "close");
        assert_eq!(json["reason"], "media_lost");
    }

    #[test]
    fn test_close_reason_wire_name_matches_label() {
        for reason in [
            CloseReason::Requested,
            CloseReason::NegotiationFailed,
            CloseReason::TransportFailed,
            CloseReason::MediaLost,
            CloseReason::NegotiationTimeout,
            CloseReason::ViewClosed,
        ] {
            let json = serde_json::to_value(reason).unwrap();
            assert_eq!(json, reason.as_str());
            assert_eq!(reason.to_string(), reason.as_str());

            let parsed: CloseReason = serde_json::from_value(json).unwrap();
            assert_eq!(parsed, reason);
        }
    }

    #[test]
    fn test_unknown_signal_type_rejected() {
        let raw = r#"{"type":"renegotiate","sdp":"v=0"}"#;
        assert!(serde_json::from_str::<SignalMessage>(raw).is_err());
    }

    #[test]
    fn test_close_reason_failure_classification() {
        assert!(CloseReason::NegotiationFailed.is_failure());
        assert!(CloseReason::MediaLost.is_failure());
        assert!(!CloseReason::Requested.is_failure());
        assert!(!CloseReason::ViewClosed.is_failure());
    }

    #[test]
    fn test_frame_image_shapes() {
        let raw = r#"{"kind":"uri","uri":"https://cdn.example/frames/1.jpg"}"#;
        let image: FrameImage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            image,
            FrameImage::Uri {
                uri: "https://cdn.example/frames/1.jpg".to_string()
            }
        );
    }
}

//! Topic naming and event names.
//!
//! Topic layout (all scoped by session):
//! - `proctor/{session}/participant/{participant}`: directives to one
//!   participant (`warning`, `link-request`)
//! - `proctor/{session}/link/{participant}/{observer}/up`: participant to
//!   observer signaling (`offer`, `ice-candidate`, `close`)
//! - `proctor/{session}/link/{participant}/{observer}/down`: observer to
//!   participant signaling (`answer`, `ice-candidate`, `close`)
//! - `proctor/{session}/frames`: still-frame broadcast (`frame`)

use common::types::{ObserverId, ParticipantId, SessionId};
use std::fmt;
use std::str::FromStr;

/// A named transport topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Directive topic for one participant.
    #[must_use]
    pub fn participant(session_id: SessionId, participant_id: ParticipantId) -> Self {
        Self(format!("proctor/{session_id}/participant/{participant_id}"))
    }

    /// Signaling sent by the participant to one observer.
    #[must_use]
    pub fn uplink(
        session_id: SessionId,
        participant_id: ParticipantId,
        observer_id: ObserverId,
    ) -> Self {
        Self(format!(
            "proctor/{session_id}/link/{participant_id}/{observer_id}/up"
        ))
    }

    /// Signaling sent by one observer to the participant.
    #[must_use]
    pub fn downlink(
        session_id: SessionId,
        participant_id: ParticipantId,
        observer_id: ObserverId,
    ) -> Self {
        Self(format!(
            "proctor/{session_id}/link/{participant_id}/{observer_id}/down"
        ))
    }

    /// Per-session still-frame broadcast.
    #[must_use]
    pub fn frames(session_id: SessionId) -> Self {
        Self(format!("proctor/{session_id}/frames"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Event names carried on topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Offer,
    Answer,
    IceCandidate,
    Close,
    LinkRequest,
    Warning,
    Frame,
}

impl Event {
    /// Signaling events the observer listens for on the uplink topic.
    pub const UPLINK: [Event; 3] = [Event::Offer, Event::IceCandidate, Event::Close];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Event::Offer => "offer",
            Event::Answer => "answer",
            Event::IceCandidate => "ice-candidate",
            Event::Close => "close",
            Event::LinkRequest => "link-request",
            Event::Warning => "warning",
            Event::Frame => "frame",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(Event::Offer),
            "answer" => Ok(Event::Answer),
            "ice-candidate" => Ok(Event::IceCandidate),
            "close" => Ok(Event::Close),
            "link-request" => Ok(Event::LinkRequest),
            "warning" => Ok(Event::Warning),
            "frame" => Ok(Event::Frame),
            other => Err(other.to_string()),
        }
    }
}

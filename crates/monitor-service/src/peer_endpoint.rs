//! Media endpoint seam for peer links.
//!
//! The monitor drives negotiation but never touches media. A
//! `PeerEndpoint` is the observer-side connection object (a WebRTC peer
//! connection in production); a `PeerEndpointFactory` creates one per
//! (observer, participant) pair. Endpoints report asynchronous events on a
//! channel handed back at creation.

use crate::errors::NegotiationError;
use common::types::{ObserverId, ParticipantId, SessionId};
use monitor_protocol::IceCandidate;
use tokio::sync::mpsc;

/// Asynchronous events raised by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// First inbound media arrived.
    MediaStarted,
    /// The endpoint gathered a local candidate to trickle to the participant.
    LocalCandidate(IceCandidate),
    /// ICE connectivity failed.
    IceFailed,
    /// The transport under the connection went away.
    Disconnected,
}

/// Observer-side connection for one pair.
#[async_trait::async_trait]
pub trait PeerEndpoint: Send + Sync {
    /// Apply the participant's offer and produce the answer SDP.
    async fn apply_offer(&mut self, sdp: &str) -> Result<String, NegotiationError>;

    /// Apply a remote candidate. Only called after the offer is applied.
    async fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError>;

    /// Whether inbound tracks are currently live.
    async fn tracks_live(&self) -> bool;

    /// Release the connection. Must be idempotent.
    async fn close(&mut self);
}

/// A created endpoint with its event channel.
pub struct EndpointParts {
    pub endpoint: Box<dyn PeerEndpoint>,
    pub events: mpsc::Receiver<EndpointEvent>,
}

/// Creates endpoints for new peer links.
#[async_trait::async_trait]
pub trait PeerEndpointFactory: Send + Sync {
    async fn create(
        &self,
        session_id: SessionId,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> Result<EndpointParts, NegotiationError>;
}

//! Signaling state machine for one (observer, participant) pair.
//!
//! ```text
//! Idle --offer--> Offering --answer published--> AnswerPending --media--> Connected
//!   \                 \                                \                     \
//!    +-----------------+--------------------------------+---------------------+--> Closed
//! ```
//!
//! An offer is accepted only in `Idle`; every later offer is rejected and
//! never triggers renegotiation. Candidates that arrive before the remote
//! description is applied are buffered and handed back once the answer is
//! out. The machine is pure; `PeerLinkActor` owns the I/O.

use monitor_protocol::{CloseReason, IceCandidate};
use std::fmt;

/// Candidates held while waiting for the offer.
pub const MAX_PENDING_CANDIDATES: usize = 64;

/// Negotiation state of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Waiting for the participant's offer.
    Idle,
    /// Offer accepted, remote description being applied.
    Offering,
    /// Answer published, waiting for media.
    AnswerPending,
    /// Inbound media flowing.
    Connected,
    /// Terminal.
    Closed { reason: CloseReason },
}

impl PeerState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeerState::Idle => "idle",
            PeerState::Offering => "offering",
            PeerState::AnswerPending => "answer_pending",
            PeerState::Connected => "connected",
            PeerState::Closed { .. } => "closed",
        }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, PeerState::Closed { .. })
    }

    /// The operator-facing "unavailable" state: closed for a failure reason.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        match self {
            PeerState::Closed { reason } => reason.is_failure(),
            _ => false,
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Closed { reason } => write!(f, "closed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Outcome of an inbound offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// Apply the offer and answer it.
    Accept,
    /// Drop the offer; the pair was already in `state`.
    Reject { state: PeerState },
}

/// Outcome of an inbound remote candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAction {
    /// Remote description is applied; hand the candidate to the endpoint.
    Apply(IceCandidate),
    /// Held until the answer is published.
    Buffered,
    /// Pair closed or buffer full.
    Dropped,
}

#[derive(Debug)]
pub struct SignalingMachine {
    state: PeerState,
    pending: Vec<IceCandidate>,
}

impl Default for SignalingMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PeerState::Idle,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Still negotiating: neither connected nor closed.
    #[must_use]
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self.state,
            PeerState::Idle | PeerState::Offering | PeerState::AnswerPending
        )
    }

    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn on_offer(&mut self) -> OfferDecision {
        if self.state == PeerState::Idle {
            self.state = PeerState::Offering;
            OfferDecision::Accept
        } else {
            OfferDecision::Reject { state: self.state }
        }
    }

    /// The answer went out. Returns buffered candidates to apply now.
    ///
    /// Ignored unless the machine is `Offering`.
    pub fn on_answer_published(&mut self) -> Vec<IceCandidate> {
        if self.state != PeerState::Offering {
            return Vec::new();
        }
        self.state = PeerState::AnswerPending;
        std::mem::take(&mut self.pending)
    }

    pub fn on_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateAction {
        match self.state {
            PeerState::AnswerPending | PeerState::Connected => CandidateAction::Apply(candidate),
            PeerState::Idle | PeerState::Offering => {
                if self.pending.len() < MAX_PENDING_CANDIDATES {
                    self.pending.push(candidate);
                    CandidateAction::Buffered
                } else {
                    CandidateAction::Dropped
                }
            }
            PeerState::Closed { .. } => CandidateAction::Dropped,
        }
    }

    /// First inbound media. Returns true on the transition to `Connected`.
    pub fn on_media_started(&mut self) -> bool {
        if self.state == PeerState::AnswerPending {
            self.state = PeerState::Connected;
            true
        } else {
            false
        }
    }

    /// Close the pair. Returns false if it was already closed; the first
    /// reason sticks.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = PeerState::Closed { reason };
        self.pending.clear();
        true
    }
}

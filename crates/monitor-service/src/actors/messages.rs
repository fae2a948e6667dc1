//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use super::peer::PeerStateStream;
use super::view::MonitoringViewHandle;
use crate::errors::MonitorError;
use crate::roster::Presence;
use common::types::{ObserverId, ParticipantId, SessionId};
use monitor_protocol::{CloseReason, FrameMessage};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Messages sent to `MonitorControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Open a view for a session, or return the one already open.
    OpenView {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<MonitoringViewHandle, MonitorError>>,
    },

    /// Look up an open view.
    GetView {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<MonitoringViewHandle, MonitorError>>,
    },

    /// Close a view and everything under it.
    CloseView {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), MonitorError>>,
    },

    /// Ask every open view to reconcile now (after an attempt was flagged).
    RefreshAll,

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting views and cancel everything.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), MonitorError>>,
    },
}

/// Messages sent to `MonitoringViewActor`.
#[derive(Debug)]
pub enum ViewMessage {
    /// Start (or join) the peer link for a pair.
    RequestPeerLink {
        observer_id: ObserverId,
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<PeerStateStream, MonitorError>>,
    },

    /// Close the peer link for a pair. Replies whether a link existed.
    ClosePeerLink {
        observer_id: ObserverId,
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<bool>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ViewStatus>,
    },
}

/// Messages sent to `PeerLinkActor`.
#[derive(Debug)]
pub enum PeerMessage {
    Close { reason: CloseReason },
}

/// Messages sent to `FrameRelayActor`.
#[derive(Debug)]
pub enum RelayMessage {
    LatestFrame {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Option<LatestFrame>>,
    },

    Presence {
        respond_to: oneshot::Sender<HashMap<ParticipantId, Presence>>,
    },

    Stats {
        respond_to: oneshot::Sender<RelayStats>,
    },
}

/// Messages sent to `ReconcilerActor`.
#[derive(Debug)]
pub enum ReconcilerMessage {
    /// Run a cycle now. Replies with the cycle number when asked to.
    Refresh {
        respond_to: Option<oneshot::Sender<u64>>,
    },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Controller status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    pub view_count: usize,
    pub peer_link_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// View status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewStatus {
    pub session_id: SessionId,
    /// Live peer links owned by this view.
    pub peer_links: usize,
    pub mailbox_depth: usize,
}

/// The most recent frame of one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestFrame {
    pub frame: FrameMessage,
    pub last_received_at: Instant,
    /// No frame arrived within the liveness window.
    pub stale: bool,
}

/// Frame relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub accepted: u64,
    pub malformed: u64,
    pub throttled: u64,
    /// Late or redelivered frames not newer than the one held.
    pub out_of_order: u64,
    /// New participants refused while the tracking limit was reached.
    pub overflow: u64,
    pub online: usize,
    pub offline: usize,
}

//! Actor bookkeeping and mailbox monitoring.
//!
//! | Actor Type  | Normal | Warning | Critical |
//! |-------------|--------|---------|----------|
//! | Controller  | < 50   | 50-200  | > 200    |
//! | View        | < 100  | 100-500 | > 500    |
//! | Peer link   | < 16   | 16-64   | > 64     |
//!
//! Frame relay and reconciler mailboxes only carry handle queries and use
//! the view thresholds.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const CONTROLLER_MAILBOX_NORMAL: usize = 50;
pub const CONTROLLER_MAILBOX_WARNING: usize = 200;

pub const VIEW_MAILBOX_NORMAL: usize = 100;
pub const VIEW_MAILBOX_WARNING: usize = 500;

pub const PEER_LINK_MAILBOX_NORMAL: usize = 16;
pub const PEER_LINK_MAILBOX_WARNING: usize = 64;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `MonitorControllerActor` (one per process).
    Controller,
    /// `MonitoringViewActor` (one per observed session).
    View,
    /// `PeerLinkActor` (one per observer/participant pair).
    PeerLink,
    /// `FrameRelayActor` (one per view).
    FrameRelay,
    /// `ReconcilerActor` (one per view).
    Reconciler,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::View => "view",
            ActorType::PeerLink => "peer_link",
            ActorType::FrameRelay => "frame_relay",
            ActorType::Reconciler => "reconciler",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Controller => CONTROLLER_MAILBOX_WARNING,
            ActorType::PeerLink => PEER_LINK_MAILBOX_WARNING,
            ActorType::View | ActorType::FrameRelay | ActorType::Reconciler => {
                VIEW_MAILBOX_WARNING
            }
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Controller => CONTROLLER_MAILBOX_NORMAL,
            ActorType::PeerLink => PEER_LINK_MAILBOX_NORMAL,
            ActorType::View | ActorType::FrameRelay | ActorType::Reconciler => {
                VIEW_MAILBOX_NORMAL
            }
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth for one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message taken off the channel and about to be handled.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        match self.level_for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "monitor.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == self.actor_type.normal_threshold() + 1 => {
                debug!(
                    target: "monitor.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a message as handled.
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Process-wide actor counters shared by the controller, views and peer
/// links. Gauge updates are mirrored to Prometheus.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub active_views: AtomicUsize,
    pub active_peer_links: AtomicUsize,
    /// Any non-zero value indicates a bug.
    pub actor_panics: AtomicU64,
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn view_opened(&self) {
        let count = self.active_views.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_views_active(count);
    }

    pub fn view_closed(&self) {
        prom::set_views_active(decrement(&self.active_views));
    }

    pub fn peer_link_opened(&self) {
        let count = self.active_peer_links.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_peer_links_active(count);
    }

    pub fn peer_link_closed(&self) {
        prom::set_peer_links_active(decrement(&self.active_peer_links));
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "monitor.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn view_count(&self) -> usize {
        self.active_views.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peer_link_count(&self) -> usize {
        self.active_peer_links.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }
}

/// Decrement without wrapping below zero; returns the new value.
fn decrement(counter: &AtomicUsize) -> usize {
    let previous = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        })
        .unwrap_or_default();
    previous.saturating_sub(1)
}

//! `MonitoringViewActor` - one per observed session.
//!
//! The view owns everything an observer needs for a session:
//!
//! - a `ReconcilerActor` producing roster snapshots
//! - a `FrameRelayActor` tracking still frames and presence
//! - one `PeerLinkActor` per (observer, participant) pair
//!
//! Every child runs on a child of the view's cancellation token, so closing
//! the view tears the whole subtree down. Peer links are supervised: a
//! finished or panicked link is reaped and a later request starts a fresh
//! one. At most one live link exists per pair.

use super::frame_relay::{FrameRelayActor, FrameRelayHandle, RelaySettings};
use super::messages::{LatestFrame, RelayStats, ViewMessage, ViewStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::peer::{
    PeerLinkActor, PeerLinkContext, PeerLinkHandle, PeerLinkTimings, PeerStateStream,
};
use super::reconciler::{ReconcilerActor, ReconcilerHandle, RosterStores, SnapshotStream};
use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::peer_endpoint::PeerEndpointFactory;
use crate::warning::WarningDispatcher;
use common::transport::ChannelTransport;
use common::types::{AttemptId, ObserverId, ParticipantId, SessionId};
use monitor_protocol::{CloseReason, Severity};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const VIEW_CHANNEL_BUFFER: usize = 500;

/// How long shutdown waits for each child task.
const CHILD_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a view needs at spawn time.
#[derive(Clone)]
pub struct ViewContext {
    pub session_id: SessionId,
    pub transport: Arc<dyn ChannelTransport>,
    pub stores: RosterStores,
    pub endpoints: Arc<dyn PeerEndpointFactory>,
    pub warnings: Arc<WarningDispatcher>,
    pub config: Arc<MonitorConfig>,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `MonitoringViewActor`.
#[derive(Clone)]
pub struct MonitoringViewHandle {
    session_id: SessionId,
    sender: mpsc::Sender<ViewMessage>,
    cancel_token: CancellationToken,
    reconciler: ReconcilerHandle,
    relay: FrameRelayHandle,
    warnings: Arc<WarningDispatcher>,
    stores: RosterStores,
}

impl fmt::Debug for MonitoringViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringViewHandle")
            .field("session_id", &self.session_id)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl MonitoringViewHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Roster snapshots, starting with the latest one.
    #[must_use]
    pub fn snapshots(&self) -> SnapshotStream {
        self.reconciler.snapshots()
    }

    /// Reconcile now and wait for the snapshot. Returns its cycle number.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the view has closed.
    pub async fn refresh(&self) -> Result<u64, MonitorError> {
        self.reconciler.refresh().await
    }

    /// Start a peer link for the pair, or join the live one.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the view has closed.
    pub async fn request_peer_link(
        &self,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> Result<PeerStateStream, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ViewMessage::RequestPeerLink {
                observer_id,
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Close the pair's link. Returns whether a live link existed.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the view has closed.
    pub async fn close_peer_link(
        &self,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> Result<bool, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ViewMessage::ClosePeerLink {
                observer_id,
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))
    }

    /// Push a warning to one participant of this session.
    ///
    /// Bypasses the view mailbox: a slow publish never delays other
    /// operations on the view.
    pub async fn send_warning(
        &self,
        participant_id: ParticipantId,
        message: &str,
        severity: Severity,
    ) -> bool {
        self.warnings
            .dispatch(self.session_id, participant_id, message, severity)
            .await
    }

    /// Flag or unflag an attempt, then reconcile so the snapshot reflects it.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Store` if the write fails, or
    /// `MonitorError::Internal` if the view has closed.
    pub async fn flag_participant(
        &self,
        attempt_id: AttemptId,
        flagged: bool,
    ) -> Result<(), MonitorError> {
        self.stores.attempts.set_flagged(attempt_id, flagged).await?;
        self.reconciler.refresh().await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the view has closed.
    pub async fn latest_frame(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<LatestFrame>, MonitorError> {
        self.relay.latest_frame(participant_id).await
    }

    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the view has closed.
    pub async fn relay_stats(&self) -> Result<RelayStats, MonitorError> {
        self.relay.stats().await
    }

    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the view has closed.
    pub async fn status(&self) -> Result<ViewStatus, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ViewMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))
    }

    /// Close the view and everything under it.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Queue a reconciliation without waiting.
    pub(crate) fn request_refresh(&self) {
        self.reconciler.request_refresh();
    }
}

struct ManagedPeerLink {
    handle: PeerLinkHandle,
    task_handle: JoinHandle<()>,
}

/// The `MonitoringViewActor` implementation.
pub struct MonitoringViewActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<ViewMessage>,
    cancel_token: CancellationToken,
    peer_links: HashMap<(ObserverId, ParticipantId), ManagedPeerLink>,
    reconciler_task: Option<JoinHandle<()>>,
    relay_task: Option<JoinHandle<()>>,
    transport: Arc<dyn ChannelTransport>,
    endpoints: Arc<dyn PeerEndpointFactory>,
    peer_timings: PeerLinkTimings,
    supervision_interval: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl MonitoringViewActor {
    /// Spawn a view with its reconciler and frame relay.
    pub fn spawn(
        context: ViewContext,
        cancel_token: CancellationToken,
    ) -> (MonitoringViewHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(VIEW_CHANNEL_BUFFER);
        let ViewContext {
            session_id,
            transport,
            stores,
            endpoints,
            warnings,
            config,
            metrics,
        } = context;

        let (relay, relay_task) = FrameRelayActor::spawn(
            session_id,
            Arc::clone(&transport),
            RelaySettings::from_config(&config),
            cancel_token.child_token(),
            Arc::clone(&metrics),
        );

        let (reconciler, reconciler_task) = ReconcilerActor::spawn(
            session_id,
            stores.clone(),
            Some(relay.clone()),
            config.poll_interval,
            cancel_token.child_token(),
            Arc::clone(&metrics),
        );

        let actor = Self {
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            peer_links: HashMap::new(),
            reconciler_task: Some(reconciler_task),
            relay_task: Some(relay_task),
            transport,
            endpoints,
            peer_timings: PeerLinkTimings::from_config(&config),
            supervision_interval: config.peer_health_check_interval,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::View, session_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MonitoringViewHandle {
            session_id,
            sender,
            cancel_token,
            reconciler,
            relay,
            warnings,
            stores,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "monitor.actor.view", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "monitor.actor.view",
            session_id = %self.session_id,
            "MonitoringViewActor started"
        );

        let mut supervision = tokio::time::interval(self.supervision_interval);
        supervision.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.check_child_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "monitor.actor.view",
                        session_id = %self.session_id,
                        "MonitoringViewActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "monitor.actor.view",
                                session_id = %self.session_id,
                                "MonitoringViewActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                // Wake periodically so finished peer links are reaped
                // even when the mailbox is idle.
                _ = supervision.tick() => {}
            }
        }

        info!(
            target: "monitor.actor.view",
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            "MonitoringViewActor stopped"
        );
    }

    fn handle_message(&mut self, message: ViewMessage) {
        match message {
            ViewMessage::RequestPeerLink {
                observer_id,
                participant_id,
                respond_to,
            } => {
                let stream = self.request_peer_link(observer_id, participant_id);
                let _ = respond_to.send(Ok(stream));
            }

            ViewMessage::ClosePeerLink {
                observer_id,
                participant_id,
                respond_to,
            } => {
                let existed = self.close_peer_link(observer_id, participant_id);
                let _ = respond_to.send(existed);
            }

            ViewMessage::GetStatus { respond_to } => {
                let live = self
                    .peer_links
                    .values()
                    .filter(|link| link.handle.is_live())
                    .count();
                let _ = respond_to.send(ViewStatus {
                    session_id: self.session_id,
                    peer_links: live,
                    mailbox_depth: self.mailbox.current_depth(),
                });
            }
        }
    }

    fn request_peer_link(
        &mut self,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> PeerStateStream {
        let key = (observer_id, participant_id);

        if let Some(existing) = self.peer_links.get(&key) {
            if existing.handle.is_live() && !existing.task_handle.is_finished() {
                debug!(
                    target: "monitor.actor.view",
                    session_id = %self.session_id,
                    observer_id = %observer_id,
                    participant_id = %participant_id,
                    "Joining existing peer link"
                );
                return existing.handle.states();
            }
        }

        if let Some(stale) = self.peer_links.remove(&key) {
            self.detach(key, stale);
        }

        let (handle, task_handle) = PeerLinkActor::spawn(
            PeerLinkContext {
                session_id: self.session_id,
                observer_id,
                participant_id,
                transport: Arc::clone(&self.transport),
                endpoints: Arc::clone(&self.endpoints),
                timings: self.peer_timings,
                metrics: Arc::clone(&self.metrics),
            },
            self.cancel_token.child_token(),
        );
        let stream = handle.states();

        self.peer_links.insert(
            key,
            ManagedPeerLink {
                handle,
                task_handle,
            },
        );

        info!(
            target: "monitor.actor.view",
            session_id = %self.session_id,
            observer_id = %observer_id,
            participant_id = %participant_id,
            peer_links = self.peer_links.len(),
            "Peer link started"
        );

        stream
    }

    fn close_peer_link(&mut self, observer_id: ObserverId, participant_id: ParticipantId) -> bool {
        let key = (observer_id, participant_id);
        let Some(managed) = self.peer_links.remove(&key) else {
            return false;
        };

        let was_live = managed.handle.is_live();
        let handle = managed.handle.clone();
        tokio::spawn(async move {
            if handle.close(CloseReason::Requested).await.is_err() {
                // Mailbox gone, the actor is already exiting
                handle.cancel();
            }
        });
        self.detach(key, managed);

        debug!(
            target: "monitor.actor.view",
            session_id = %self.session_id,
            observer_id = %observer_id,
            participant_id = %participant_id,
            "Peer link close requested"
        );
        was_live
    }

    /// Wait for a removed link in the background so the mailbox keeps moving.
    fn detach(&self, key: (ObserverId, ParticipantId), managed: ManagedPeerLink) {
        let session_id = self.session_id;
        let metrics = Arc::clone(&self.metrics);
        let (observer_id, participant_id) = key;
        tokio::spawn(async move {
            match tokio::time::timeout(CHILD_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    if join_error.is_panic() {
                        error!(
                            target: "monitor.actor.view",
                            session_id = %session_id,
                            observer_id = %observer_id,
                            participant_id = %participant_id,
                            error = ?join_error,
                            "Peer link panicked"
                        );
                        metrics.record_panic(ActorType::PeerLink);
                        metrics.peer_link_closed();
                    }
                }
                Err(_) => {
                    warn!(
                        target: "monitor.actor.view",
                        session_id = %session_id,
                        observer_id = %observer_id,
                        participant_id = %participant_id,
                        "Peer link did not exit in time, cancelling"
                    );
                    managed.handle.cancel();
                }
            }
        });
    }

    /// Reap finished peer links; close the view if the reconciler or relay
    /// died.
    async fn check_child_health(&mut self) {
        let finished: Vec<(ObserverId, ParticipantId)> = self
            .peer_links
            .iter()
            .filter(|(_, link)| link.task_handle.is_finished())
            .map(|(key, _)| *key)
            .collect();

        for key in finished {
            let Some(managed) = self.peer_links.remove(&key) else {
                continue;
            };
            let (observer_id, participant_id) = key;
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "monitor.actor.view",
                        session_id = %self.session_id,
                        observer_id = %observer_id,
                        participant_id = %participant_id,
                        state = %managed.handle.state(),
                        "Peer link reaped"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "monitor.actor.view",
                            session_id = %self.session_id,
                            observer_id = %observer_id,
                            participant_id = %participant_id,
                            error = ?join_error,
                            "Peer link panicked - triggering investigation"
                        );
                        self.metrics.record_panic(ActorType::PeerLink);
                        // The actor never decremented its own gauge
                        self.metrics.peer_link_closed();
                    }
                }
            }
        }

        if self.cancel_token.is_cancelled() {
            return;
        }

        let reconciler_down = take_if_finished(&mut self.reconciler_task);
        let relay_down = take_if_finished(&mut self.relay_task);
        for (actor_type, task) in [
            (ActorType::Reconciler, reconciler_down),
            (ActorType::FrameRelay, relay_down),
        ] {
            let Some(task) = task else { continue };
            let panicked = matches!(task.await, Err(ref e) if e.is_panic());
            if panicked {
                self.metrics.record_panic(actor_type);
            }
            error!(
                target: "monitor.actor.view",
                session_id = %self.session_id,
                actor_type = actor_type.as_str(),
                panicked,
                "View child exited unexpectedly, closing view"
            );
            self.cancel_token.cancel();
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "monitor.actor.view",
            session_id = %self.session_id,
            peer_links = self.peer_links.len(),
            "Performing graceful shutdown"
        );

        // Children hold child tokens; cancel explicitly when exiting on a
        // closed mailbox.
        self.cancel_token.cancel();

        for ((observer_id, participant_id), managed) in self.peer_links.drain() {
            match tokio::time::timeout(CHILD_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "monitor.actor.view",
                        session_id = %self.session_id,
                        observer_id = %observer_id,
                        participant_id = %participant_id,
                        error = ?e,
                        "Peer link task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "monitor.actor.view",
                        session_id = %self.session_id,
                        observer_id = %observer_id,
                        participant_id = %participant_id,
                        "Peer link shutdown timed out"
                    );
                }
            }
        }

        for (name, task) in [
            ("reconciler", self.reconciler_task.take()),
            ("frame_relay", self.relay_task.take()),
        ] {
            let Some(task) = task else { continue };
            if tokio::time::timeout(CHILD_SHUTDOWN_TIMEOUT, task)
                .await
                .is_err()
            {
                warn!(
                    target: "monitor.actor.view",
                    session_id = %self.session_id,
                    child = name,
                    "Child shutdown timed out"
                );
            }
        }

        info!(
            target: "monitor.actor.view",
            session_id = %self.session_id,
            "Graceful shutdown complete"
        );
    }
}

fn take_if_finished(task: &mut Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
    if task.as_ref().is_some_and(JoinHandle::is_finished) {
        task.take()
    } else {
        None
    }
}

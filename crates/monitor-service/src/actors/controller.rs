//! `MonitorControllerActor` - singleton supervisor for monitoring views.
//!
//! The controller is the top-level actor of the monitor:
//!
//! - Singleton per monitor instance
//! - Opens one `MonitoringViewActor` per observed session, on demand
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors view health (panic detection via `JoinHandle`)
//! - Drives the readiness probe
//!
//! Warnings and flag writes go straight from the handle to their
//! collaborators; they never queue behind view management.
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller:
//! 1. Marks itself not ready and stops accepting views
//! 2. Cancels the root token (propagates to every view and peer link)
//! 3. Waits for each view to finish, bounded per view

use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::peer::PeerStateStream;
use super::reconciler::{RosterStores, SnapshotStream};
use super::view::{MonitoringViewActor, MonitoringViewHandle, ViewContext};
use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::observability::HealthState;
use crate::peer_endpoint::PeerEndpointFactory;
use crate::warning::WarningDispatcher;
use common::stores::{AttemptStore, RosterStore, SessionStore};
use common::transport::ChannelTransport;
use common::types::{AttemptId, ObserverId, ParticipantId, SessionId};
use monitor_protocol::Severity;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each view.
const VIEW_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a closed view gets to finish in the background.
const VIEW_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// External collaborators the monitor is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn ChannelTransport>,
    pub rosters: Arc<dyn RosterStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub endpoints: Arc<dyn PeerEndpointFactory>,
}

impl Collaborators {
    fn roster_stores(&self) -> RosterStores {
        RosterStores {
            rosters: Arc::clone(&self.rosters),
            sessions: Arc::clone(&self.sessions),
            attempts: Arc::clone(&self.attempts),
        }
    }
}

/// Handle to the `MonitorControllerActor`.
///
/// This is the public interface of the monitor.
#[derive(Clone)]
pub struct MonitorControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    warnings: Arc<WarningDispatcher>,
    attempts: Arc<dyn AttemptStore>,
}

impl MonitorControllerActorHandle {
    /// Create the controller actor and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        collaborators: Collaborators,
        metrics: Arc<ActorMetrics>,
        health: Arc<HealthState>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let warnings = Arc::new(WarningDispatcher::new(
            Arc::clone(&collaborators.transport),
            &config,
        ));
        let attempts = Arc::clone(&collaborators.attempts);

        let actor = MonitorControllerActor {
            instance_id: config.instance_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            views: HashMap::new(),
            accepting_new: true,
            config: Arc::new(config),
            collaborators,
            warnings: Arc::clone(&warnings),
            health,
            mailbox: MailboxMonitor::new(ActorType::Controller, "controller"),
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            warnings,
            attempts,
        }
    }

    /// Open (or join) the monitoring view of a session and stream its
    /// roster snapshots.
    ///
    /// The stream is lazy and restartable: calling this again for the same
    /// session returns a new stream over the same view.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Draining` during shutdown and
    /// `MonitorError::CapacityExceeded` when the view limit is reached.
    pub async fn open_monitoring_view(
        &self,
        session_id: SessionId,
    ) -> Result<SnapshotStream, MonitorError> {
        let view = self.open_view(session_id).await?;
        Ok(view.snapshots())
    }

    /// Open (or join) a view and return its handle.
    ///
    /// # Errors
    ///
    /// Same as [`Self::open_monitoring_view`].
    pub async fn open_view(
        &self,
        session_id: SessionId,
    ) -> Result<MonitoringViewHandle, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::OpenView {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Handle of an open view.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::ViewNotFound` if no view is open for the session.
    pub async fn view(&self, session_id: SessionId) -> Result<MonitoringViewHandle, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetView {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Close a view. Its snapshot streams end and its peer links close.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::ViewNotFound` if no view is open for the session.
    pub async fn close_monitoring_view(&self, session_id: SessionId) -> Result<(), MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::CloseView {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Start (or join) the peer link for a pair in an open view.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::ViewNotFound` if no view is open for the session.
    pub async fn request_peer_link(
        &self,
        session_id: SessionId,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> Result<PeerStateStream, MonitorError> {
        self.view(session_id)
            .await?
            .request_peer_link(observer_id, participant_id)
            .await
    }

    /// Close the peer link for a pair. Returns whether a link existed.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::ViewNotFound` if no view is open for the session.
    pub async fn close_peer_link(
        &self,
        session_id: SessionId,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> Result<bool, MonitorError> {
        self.view(session_id)
            .await?
            .close_peer_link(observer_id, participant_id)
            .await
    }

    /// Push a warning to one participant. Returns whether the publish call
    /// succeeded. Does not need an open view.
    pub async fn send_warning(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        message: &str,
        severity: Severity,
    ) -> bool {
        self.warnings
            .dispatch(session_id, participant_id, message, severity)
            .await
    }

    /// Flag or unflag an attempt and refresh every open view.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Store` if the write fails.
    pub async fn flag_participant(
        &self,
        attempt_id: AttemptId,
        flagged: bool,
    ) -> Result<(), MonitorError> {
        self.attempts.set_flagged(attempt_id, flagged).await?;
        self.sender
            .send(ControllerMessage::RefreshAll)
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))
    }

    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the controller has exited.
    pub async fn get_status(&self) -> Result<ControllerStatus, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the controller has exited.
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedView {
    handle: MonitoringViewHandle,
    task_handle: JoinHandle<()>,
}

/// The `MonitorControllerActor` implementation.
pub struct MonitorControllerActor {
    instance_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    cancel_token: CancellationToken,
    views: HashMap<SessionId, ManagedView>,
    accepting_new: bool,
    config: Arc<MonitorConfig>,
    collaborators: Collaborators,
    warnings: Arc<WarningDispatcher>,
    health: Arc<HealthState>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl MonitorControllerActor {
    #[instrument(
        skip_all,
        name = "monitor.actor.controller",
        fields(instance_id = %self.instance_id)
    )]
    async fn run(mut self) {
        info!(
            target: "monitor.actor.controller",
            instance_id = %self.instance_id,
            max_views = self.config.max_views,
            "MonitorControllerActor started"
        );
        self.health.set_ready();

        loop {
            self.check_view_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "monitor.actor.controller",
                        instance_id = %self.instance_id,
                        "MonitorControllerActor received cancellation signal"
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
                                target: "monitor.actor.controller",
                                instance_id = %self.instance_id,
                                "MonitorControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "monitor.actor.controller",
            instance_id = %self.instance_id,
            views_remaining = self.views.len(),
            messages_processed = self.mailbox.messages_processed(),
            "MonitorControllerActor stopped"
        );
    }

    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::OpenView {
                session_id,
                respond_to,
            } => {
                let result = self.open_view(session_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetView {
                session_id,
                respond_to,
            } => {
                let result = self
                    .views
                    .get(&session_id)
                    .filter(|managed| !managed.handle.is_cancelled())
                    .map(|managed| managed.handle.clone())
                    .ok_or(MonitorError::ViewNotFound(session_id));
                let _ = respond_to.send(result);
            }

            ControllerMessage::CloseView {
                session_id,
                respond_to,
            } => {
                let result = self.close_view(session_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::RefreshAll => {
                for managed in self.views.values() {
                    managed.handle.request_refresh();
                }
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(ControllerStatus {
                    view_count: self.views.len(),
                    peer_link_count: self.metrics.peer_link_count(),
                    is_draining: !self.accepting_new,
                    mailbox_depth: self.mailbox.current_depth(),
                });
            }

            ControllerMessage::Shutdown { respond_to } => {
                info!(
                    target: "monitor.actor.controller",
                    instance_id = %self.instance_id,
                    view_count = self.views.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.health.set_not_ready();
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn open_view(&mut self, session_id: SessionId) -> Result<MonitoringViewHandle, MonitorError> {
        if !self.accepting_new {
            return Err(MonitorError::Draining);
        }

        if let Some(managed) = self.views.get(&session_id) {
            if !managed.handle.is_cancelled() && !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
        }
        if let Some(stale) = self.views.remove(&session_id) {
            self.detach(session_id, stale);
        }

        if self.views.len() >= self.config.max_views {
            warn!(
                target: "monitor.actor.controller",
                instance_id = %self.instance_id,
                max_views = self.config.max_views,
                "View limit reached"
            );
            return Err(MonitorError::CapacityExceeded);
        }

        let (handle, task_handle) = MonitoringViewActor::spawn(
            ViewContext {
                session_id,
                transport: Arc::clone(&self.collaborators.transport),
                stores: self.collaborators.roster_stores(),
                endpoints: Arc::clone(&self.collaborators.endpoints),
                warnings: Arc::clone(&self.warnings),
                config: Arc::clone(&self.config),
                metrics: Arc::clone(&self.metrics),
            },
            self.cancel_token.child_token(),
        );

        self.views.insert(
            session_id,
            ManagedView {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.view_opened();

        info!(
            target: "monitor.actor.controller",
            instance_id = %self.instance_id,
            session_id = %session_id,
            total_views = self.views.len(),
            "Monitoring view opened"
        );

        Ok(handle)
    }

    fn close_view(&mut self, session_id: SessionId) -> Result<(), MonitorError> {
        let managed = self
            .views
            .remove(&session_id)
            .ok_or(MonitorError::ViewNotFound(session_id))?;

        self.detach(session_id, managed);

        info!(
            target: "monitor.actor.controller",
            instance_id = %self.instance_id,
            session_id = %session_id,
            total_views = self.views.len(),
            "Monitoring view closed"
        );
        Ok(())
    }

    /// Cancel a removed view and wait for it in the background so the
    /// message loop is never blocked.
    fn detach(&self, session_id: SessionId, managed: ManagedView) {
        managed.handle.close();
        self.metrics.view_closed();

        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match tokio::time::timeout(VIEW_CLOSE_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "monitor.actor.controller",
                        session_id = %session_id,
                        "View task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    if e.is_panic() {
                        metrics.record_panic(ActorType::View);
                    }
                    warn!(
                        target: "monitor.actor.controller",
                        session_id = %session_id,
                        error = ?e,
                        "View task panicked during close"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "monitor.actor.controller",
                        session_id = %session_id,
                        "View task cleanup timed out"
                    );
                }
            }
        });
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "monitor.actor.controller",
            instance_id = %self.instance_id,
            view_count = self.views.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        self.health.set_not_ready();

        for managed in self.views.values() {
            managed.handle.close();
        }

        for (session_id, managed) in self.views.drain() {
            match tokio::time::timeout(VIEW_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "monitor.actor.controller",
                        session_id = %session_id,
                        "View completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "monitor.actor.controller",
                        session_id = %session_id,
                        error = ?e,
                        "View task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "monitor.actor.controller",
                        session_id = %session_id,
                        "View shutdown timed out"
                    );
                }
            }
            self.metrics.view_closed();
        }

        info!(
            target: "monitor.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop views whose task ended on its own.
    async fn check_view_health(&mut self) {
        let finished: Vec<SessionId> = self
            .views
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(session_id, _)| *session_id)
            .collect();

        for session_id in finished {
            let Some(managed) = self.views.remove(&session_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "monitor.actor.controller",
                        instance_id = %self.instance_id,
                        session_id = %session_id,
                        "View exited on its own"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "monitor.actor.controller",
                            instance_id = %self.instance_id,
                            session_id = %session_id,
                            error = ?join_error,
                            "View panicked - triggering investigation"
                        );
                        self.metrics.record_panic(ActorType::View);
                    }
                }
            }
            self.metrics.view_closed();
        }
    }
}

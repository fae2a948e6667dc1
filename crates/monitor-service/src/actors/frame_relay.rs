//! `FrameRelayActor` - per-view still-frame relay and presence tracker.
//!
//! Subscribes to the session's frames topic and keeps only the latest frame
//! of each participant. A participant with no frame inside the liveness
//! window is `Offline`; their last frame is kept but reported stale. The
//! next valid frame brings them back `Online`.
//!
//! Malformed payloads, frames arriving faster than the minimum interval and
//! frames captured no later than the one already held (late or redelivered)
//! are dropped and counted. At most `max_tracked_participants` participants
//! are tracked; when full, the longest-offline one makes room. Nothing a
//! client sends can stop the relay.

use super::messages::{LatestFrame, RelayMessage, RelayStats};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::observability::metrics;
use crate::roster::Presence;
use common::transport::{ChannelTransport, Envelope, Subscription};
use common::types::{ParticipantId, SessionId};
use monitor_protocol::codec::decode_frame;
use monitor_protocol::{Event, FrameLimits, FrameMessage, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const RELAY_CHANNEL_BUFFER: usize = 256;

/// Timings and bounds a relay runs with.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub frame_timeout: Duration,
    pub presence_check_interval: Duration,
    /// Zero disables throttling.
    pub frame_min_interval: Duration,
    pub limits: FrameLimits,
    pub max_tracked_participants: usize,
}

impl RelaySettings {
    #[must_use]
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            frame_timeout: config.frame_timeout,
            presence_check_interval: config.presence_check_interval,
            frame_min_interval: config.frame_min_interval,
            limits: config.frame_limits(),
            max_tracked_participants: config.max_tracked_participants,
        }
    }
}

/// Handle to a `FrameRelayActor`.
#[derive(Debug, Clone)]
pub struct FrameRelayHandle {
    sender: mpsc::Sender<RelayMessage>,
    cancel_token: CancellationToken,
}

impl FrameRelayHandle {
    /// Latest frame of one participant, if any was ever received.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the relay has exited.
    pub async fn latest_frame(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<LatestFrame>, MonitorError> {
        self.request(|respond_to| RelayMessage::LatestFrame {
            participant_id,
            respond_to,
        })
        .await
    }

    /// Presence of every participant that ever sent a frame.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the relay has exited.
    pub async fn presence(&self) -> Result<HashMap<ParticipantId, Presence>, MonitorError> {
        self.request(|respond_to| RelayMessage::Presence { respond_to })
            .await
    }

    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the relay has exited.
    pub async fn stats(&self) -> Result<RelayStats, MonitorError> {
        self.request(|respond_to| RelayMessage::Stats { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RelayMessage,
    ) -> Result<T, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Latest frame plus liveness bookkeeping for one participant.
#[derive(Debug)]
struct TrackedFrame {
    frame: FrameMessage,
    last_received_at: Instant,
    /// Last presence reported by the sweep, for transition logging.
    offline: bool,
}

impl TrackedFrame {
    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_received_at) >= timeout
    }
}

/// The `FrameRelayActor` implementation.
pub struct FrameRelayActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<RelayMessage>,
    cancel_token: CancellationToken,
    transport: Arc<dyn ChannelTransport>,
    topic: Topic,
    subscription: Option<Subscription>,
    settings: RelaySettings,
    frames: HashMap<ParticipantId, TrackedFrame>,
    accepted: u64,
    malformed: u64,
    throttled: u64,
    out_of_order: u64,
    overflow: u64,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl FrameRelayActor {
    /// Spawn a relay for one session.
    pub fn spawn(
        session_id: SessionId,
        transport: Arc<dyn ChannelTransport>,
        settings: RelaySettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (FrameRelayHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(RELAY_CHANNEL_BUFFER);

        let actor = Self {
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            transport,
            topic: Topic::frames(session_id),
            subscription: None,
            settings,
            frames: HashMap::new(),
            accepted: 0,
            malformed: 0,
            throttled: 0,
            out_of_order: 0,
            overflow: 0,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::FrameRelay, session_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            FrameRelayHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(
        skip_all,
        name = "monitor.task.frame_relay",
        fields(session_id = %self.session_id)
    )]
    async fn run(mut self) {
        info!(
            target: "monitor.task.frame_relay",
            session_id = %self.session_id,
            "FrameRelayActor started"
        );

        self.subscription = self.subscribe().await;

        let period = self.settings.presence_check_interval;
        let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "monitor.task.frame_relay",
                        session_id = %self.session_id,
                        "FrameRelayActor received cancellation signal"
                    );
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
                        None => break,
                    }
                }

                envelope = next_envelope(&mut self.subscription) => {
                    match envelope {
                        Some(envelope) => self.on_frame(&envelope),
                        None => {
                            warn!(
                                target: "monitor.task.frame_relay",
                                session_id = %self.session_id,
                                "Frames subscription ended, resubscribing on next sweep"
                            );
                            self.subscription = None;
                        }
                    }
                }

                _ = sweep.tick() => {
                    self.sweep();
                    if self.subscription.is_none() {
                        self.subscription = self.subscribe().await;
                    }
                }
            }
        }

        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = self.transport.unsubscribe(subscription.id()).await {
                debug!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    error = %e,
                    "Unsubscribe failed"
                );
            }
        }

        info!(
            target: "monitor.task.frame_relay",
            session_id = %self.session_id,
            accepted = self.accepted,
            malformed = self.malformed,
            throttled = self.throttled,
            out_of_order = self.out_of_order,
            overflow = self.overflow,
            messages_processed = self.mailbox.messages_processed(),
            "FrameRelayActor stopped"
        );
    }

    async fn subscribe(&self) -> Option<Subscription> {
        match self
            .transport
            .subscribe(self.topic.as_str(), Event::Frame.as_str())
            .await
        {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    error = %e,
                    "Failed to subscribe to frames topic"
                );
                None
            }
        }
    }

    fn handle_message(&self, message: RelayMessage) {
        let now = Instant::now();
        match message {
            RelayMessage::LatestFrame {
                participant_id,
                respond_to,
            } => {
                let latest = self.frames.get(&participant_id).map(|tracked| LatestFrame {
                    frame: tracked.frame.clone(),
                    last_received_at: tracked.last_received_at,
                    stale: tracked.is_expired(now, self.settings.frame_timeout),
                });
                let _ = respond_to.send(latest);
            }

            RelayMessage::Presence { respond_to } => {
                let _ = respond_to.send(self.presence_at(now));
            }

            RelayMessage::Stats { respond_to } => {
                let presence = self.presence_at(now);
                let online = presence
                    .values()
                    .filter(|p| **p == Presence::Online)
                    .count();
                let _ = respond_to.send(RelayStats {
                    accepted: self.accepted,
                    malformed: self.malformed,
                    throttled: self.throttled,
                    out_of_order: self.out_of_order,
                    overflow: self.overflow,
                    online,
                    offline: presence.len() - online,
                });
            }
        }
    }

    fn presence_at(&self, now: Instant) -> HashMap<ParticipantId, Presence> {
        self.frames
            .iter()
            .map(|(participant_id, tracked)| {
                let presence = if tracked.is_expired(now, self.settings.frame_timeout) {
                    Presence::Offline
                } else {
                    Presence::Online
                };
                (*participant_id, presence)
            })
            .collect()
    }

    fn on_frame(&mut self, envelope: &Envelope) {
        let frame = match decode_frame(&envelope.payload, self.settings.limits) {
            Ok(frame) => frame,
            Err(e) => {
                self.malformed += 1;
                metrics::record_frame("malformed");
                debug!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    error = %e,
                    "Dropping malformed frame"
                );
                return;
            }
        };

        let now = Instant::now();
        let participant_id = frame.participant_id;

        if let Some(tracked) = self.frames.get_mut(&participant_id) {
            if frame.captured_at <= tracked.frame.captured_at {
                self.out_of_order += 1;
                metrics::record_frame("out_of_order");
                debug!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    participant_id = %participant_id,
                    "Dropping frame not newer than the one held"
                );
                return;
            }

            let min_interval = self.settings.frame_min_interval;
            if !min_interval.is_zero()
                && now.saturating_duration_since(tracked.last_received_at) < min_interval
            {
                self.throttled += 1;
                metrics::record_frame("throttled");
                return;
            }

            if tracked.offline {
                info!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    participant_id = %participant_id,
                    "Participant back online"
                );
            }
            tracked.frame = frame;
            tracked.last_received_at = now;
            tracked.offline = false;
        } else {
            if self.frames.len() >= self.settings.max_tracked_participants
                && !self.evict_longest_offline(now)
            {
                self.overflow += 1;
                metrics::record_frame("overflow");
                warn!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    participant_id = %participant_id,
                    tracked = self.frames.len(),
                    "Dropping frame, participant limit reached"
                );
                return;
            }

            debug!(
                target: "monitor.task.frame_relay",
                session_id = %self.session_id,
                participant_id = %participant_id,
                "First frame from participant"
            );
            self.frames.insert(
                participant_id,
                TrackedFrame {
                    frame,
                    last_received_at: now,
                    offline: false,
                },
            );
        }

        self.accepted += 1;
        metrics::record_frame("accepted");
    }

    /// Forget the participant silent the longest, if they are offline.
    fn evict_longest_offline(&mut self, now: Instant) -> bool {
        let timeout = self.settings.frame_timeout;
        let oldest = self
            .frames
            .iter()
            .filter(|(_, tracked)| tracked.is_expired(now, timeout))
            .min_by_key(|(_, tracked)| tracked.last_received_at)
            .map(|(participant_id, _)| *participant_id);

        match oldest {
            Some(participant_id) => {
                self.frames.remove(&participant_id);
                debug!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    participant_id = %participant_id,
                    "Evicted offline participant to make room"
                );
                true
            }
            None => false,
        }
    }

    /// Log participants whose liveness window just ran out.
    fn sweep(&mut self) {
        let now = Instant::now();
        let timeout = self.settings.frame_timeout;
        for (participant_id, tracked) in &mut self.frames {
            if !tracked.offline && tracked.is_expired(now, timeout) {
                tracked.offline = true;
                info!(
                    target: "monitor.task.frame_relay",
                    session_id = %self.session_id,
                    participant_id = %participant_id,
                    timeout_ms = timeout.as_millis(),
                    "Participant offline, no frame within liveness window"
                );
            }
        }
    }
}

async fn next_envelope(subscription: &mut Option<Subscription>) -> Option<Envelope> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

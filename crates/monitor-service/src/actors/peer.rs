//! `PeerLinkActor` - one task per (observer, participant) pair.
//!
//! The actor owns the pair's `SignalingMachine`, its media endpoint and its
//! three uplink subscriptions (offer, ice-candidate, close). It answers at
//! most one offer, trickles candidates both ways, probes track health while
//! connected and closes on the first failure. State changes are published
//! on a watch channel that backs `PeerStateStream`.
//!
//! Nothing here is shared with other pairs: a failing pair cannot stall or
//! close any other.

use super::messages::PeerMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::signaling::{CandidateAction, OfferDecision, PeerState, SignalingMachine};
use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::observability::metrics;
use crate::peer_endpoint::{EndpointEvent, EndpointParts, PeerEndpoint, PeerEndpointFactory};
use common::transport::{ChannelTransport, Envelope, Subscription};
use common::types::{ObserverId, ParticipantId, SessionId};
use monitor_protocol::codec::{self, MAX_SIGNAL_BYTES};
use monitor_protocol::{CloseReason, Event, LinkRequest, SignalMessage, Topic, WireMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Peer link mailboxes only ever carry a close request.
const PEER_CHANNEL_BUFFER: usize = 8;

/// Stream of a pair's negotiation states.
///
/// Yields the current state first, then each change, and ends after
/// `Closed`. Intermediate states may be coalesced when the reader is slow;
/// the terminal state is always delivered.
#[derive(Debug)]
pub struct PeerStateStream {
    receiver: watch::Receiver<PeerState>,
    started: bool,
    finished: bool,
}

impl PeerStateStream {
    fn new(receiver: watch::Receiver<PeerState>) -> Self {
        Self {
            receiver,
            started: false,
            finished: false,
        }
    }

    /// Wait for the next state.
    pub async fn next(&mut self) -> Option<PeerState> {
        if self.finished {
            return None;
        }

        let state = if self.started {
            if self.receiver.changed().await.is_err() {
                self.finished = true;
                return None;
            }
            *self.receiver.borrow_and_update()
        } else {
            self.started = true;
            *self.receiver.borrow_and_update()
        };

        if state.is_closed() {
            self.finished = true;
        }
        Some(state)
    }

    /// Current state without waiting.
    #[must_use]
    pub fn current(&self) -> PeerState {
        *self.receiver.borrow()
    }

    /// Wait until the pair is closed and return the final state.
    pub async fn closed(&mut self) -> PeerState {
        let mut last = self.current();
        while let Some(state) = self.next().await {
            last = state;
        }
        last
    }
}

/// Timings a peer link runs with.
#[derive(Debug, Clone, Copy)]
pub struct PeerLinkTimings {
    pub health_check_interval: Duration,
    pub negotiation_timeout: Duration,
    pub publish_timeout: Duration,
}

impl PeerLinkTimings {
    #[must_use]
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            health_check_interval: config.peer_health_check_interval,
            negotiation_timeout: config.negotiation_timeout,
            publish_timeout: config.publish_timeout,
        }
    }
}

/// Everything a peer link needs at spawn time.
#[derive(Clone)]
pub struct PeerLinkContext {
    pub session_id: SessionId,
    pub observer_id: ObserverId,
    pub participant_id: ParticipantId,
    pub transport: Arc<dyn ChannelTransport>,
    pub endpoints: Arc<dyn PeerEndpointFactory>,
    pub timings: PeerLinkTimings,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `PeerLinkActor`.
#[derive(Debug, Clone)]
pub struct PeerLinkHandle {
    sender: mpsc::Sender<PeerMessage>,
    states: watch::Receiver<PeerState>,
    cancel_token: CancellationToken,
}

impl PeerLinkHandle {
    /// A fresh stream starting at the current state.
    #[must_use]
    pub fn states(&self) -> PeerStateStream {
        PeerStateStream::new(self.states.clone())
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        *self.states.borrow()
    }

    /// Not yet closed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.state().is_closed()
    }

    /// Ask the actor to close with `reason`.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the actor has already exited.
    pub async fn close(&self, reason: CloseReason) -> Result<(), MonitorError> {
        self.sender
            .send(PeerMessage::Close { reason })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// How the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    /// Closed on our side; the participant is told.
    Local(CloseReason),
    /// The participant sent `close`; nothing to echo.
    Remote,
}

impl LinkEnd {
    const fn reason(self) -> CloseReason {
        match self {
            LinkEnd::Local(reason) => reason,
            LinkEnd::Remote => CloseReason::Requested,
        }
    }
}

/// Per-link I/O owned by the event loop.
struct LinkIo {
    endpoint: Box<dyn PeerEndpoint>,
    endpoint_events: Option<mpsc::Receiver<EndpointEvent>>,
    offers: Subscription,
    candidates: Subscription,
    closes: Subscription,
}

impl LinkIo {
    fn subscriptions(&self) -> [&Subscription; 3] {
        [&self.offers, &self.candidates, &self.closes]
    }
}

/// The `PeerLinkActor` implementation.
pub struct PeerLinkActor {
    session_id: SessionId,
    observer_id: ObserverId,
    participant_id: ParticipantId,
    receiver: mpsc::Receiver<PeerMessage>,
    cancel_token: CancellationToken,
    state_tx: watch::Sender<PeerState>,
    machine: SignalingMachine,
    transport: Arc<dyn ChannelTransport>,
    endpoints: Arc<dyn PeerEndpointFactory>,
    timings: PeerLinkTimings,
    uplink: Topic,
    downlink: Topic,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl PeerLinkActor {
    /// Spawn a peer link and return its handle and task.
    pub fn spawn(
        context: PeerLinkContext,
        cancel_token: CancellationToken,
    ) -> (PeerLinkHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PEER_CHANNEL_BUFFER);
        let (state_tx, states) = watch::channel(PeerState::Idle);

        let PeerLinkContext {
            session_id,
            observer_id,
            participant_id,
            transport,
            endpoints,
            timings,
            metrics,
        } = context;

        let actor = Self {
            session_id,
            observer_id,
            participant_id,
            receiver,
            cancel_token: cancel_token.clone(),
            state_tx,
            machine: SignalingMachine::new(),
            transport,
            endpoints,
            timings,
            uplink: Topic::uplink(session_id, participant_id, observer_id),
            downlink: Topic::downlink(session_id, participant_id, observer_id),
            metrics,
            mailbox: MailboxMonitor::new(
                ActorType::PeerLink,
                format!("{observer_id}/{participant_id}"),
            ),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            PeerLinkHandle {
                sender,
                states,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(
        skip_all,
        name = "monitor.actor.peer",
        fields(
            session_id = %self.session_id,
            observer_id = %self.observer_id,
            participant_id = %self.participant_id
        )
    )]
    async fn run(mut self) {
        info!(
            target: "monitor.actor.peer",
            session_id = %self.session_id,
            observer_id = %self.observer_id,
            participant_id = %self.participant_id,
            "PeerLinkActor started"
        );
        self.metrics.peer_link_opened();

        let end = match self.open().await {
            Ok(mut io) => {
                let end = self.event_loop(&mut io).await;
                self.release(io).await;
                end
            }
            Err(reason) => LinkEnd::Local(reason),
        };

        let reason = end.reason();
        if self.machine.close(reason) {
            self.publish_state();
        }
        if let LinkEnd::Local(reason) = end {
            self.notify_participant_closed(reason);
        }
        metrics::record_peer_link_closed(reason);
        self.metrics.peer_link_closed();

        info!(
            target: "monitor.actor.peer",
            session_id = %self.session_id,
            observer_id = %self.observer_id,
            participant_id = %self.participant_id,
            reason = %reason,
            messages_processed = self.mailbox.messages_processed(),
            "PeerLinkActor stopped"
        );
    }

    /// Create the endpoint, subscribe to the uplink and ask the participant
    /// to start offering.
    async fn open(&mut self) -> Result<LinkIo, CloseReason> {
        let EndpointParts { mut endpoint, events } = self
            .endpoints
            .create(self.session_id, self.observer_id, self.participant_id)
            .await
            .map_err(|e| {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Failed to create peer endpoint"
                );
                CloseReason::NegotiationFailed
            })?;

        let mut subscriptions = Vec::with_capacity(Event::UPLINK.len());
        for event in Event::UPLINK {
            match self
                .transport
                .subscribe(self.uplink.as_str(), event.as_str())
                .await
            {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    warn!(
                        target: "monitor.actor.peer",
                        participant_id = %self.participant_id,
                        event = %event,
                        error = %e,
                        "Failed to subscribe to uplink"
                    );
                    for subscription in &subscriptions {
                        self.unsubscribe(subscription).await;
                    }
                    endpoint.close().await;
                    return Err(CloseReason::TransportFailed);
                }
            }
        }

        let mut subscriptions = subscriptions.into_iter();
        let (Some(offers), Some(candidates), Some(closes)) = (
            subscriptions.next(),
            subscriptions.next(),
            subscriptions.next(),
        ) else {
            endpoint.close().await;
            return Err(CloseReason::TransportFailed);
        };

        self.request_offer().await;

        Ok(LinkIo {
            endpoint,
            endpoint_events: Some(events),
            offers,
            candidates,
            closes,
        })
    }

    async fn event_loop(&mut self, io: &mut LinkIo) -> LinkEnd {
        let period = self.timings.health_check_interval;
        let mut health = tokio::time::interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = tokio::time::sleep(self.timings.negotiation_timeout);
        tokio::pin!(deadline);

        loop {
            let negotiating = self.machine.is_negotiating();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    return LinkEnd::Local(CloseReason::ViewClosed);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(PeerMessage::Close { reason }) => {
                            self.mailbox.record_enqueue();
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            return LinkEnd::Local(reason);
                        }
                        None => return LinkEnd::Local(CloseReason::ViewClosed),
                    }
                }

                envelope = io.offers.recv() => {
                    let Some(envelope) = envelope else {
                        return self.subscription_ended(Event::Offer);
                    };
                    if let Some(reason) = self.on_offer(io, &envelope).await {
                        return LinkEnd::Local(reason);
                    }
                }

                envelope = io.candidates.recv() => {
                    let Some(envelope) = envelope else {
                        return self.subscription_ended(Event::IceCandidate);
                    };
                    self.on_remote_candidate(io, &envelope).await;
                }

                envelope = io.closes.recv() => {
                    let Some(envelope) = envelope else {
                        return self.subscription_ended(Event::Close);
                    };
                    if self.is_remote_close(&envelope) {
                        return LinkEnd::Remote;
                    }
                }

                event = next_endpoint_event(&mut io.endpoint_events) => {
                    match event {
                        Some(event) => {
                            if let Some(reason) = self.on_endpoint_event(event).await {
                                return LinkEnd::Local(reason);
                            }
                        }
                        None => {
                            debug!(
                                target: "monitor.actor.peer",
                                participant_id = %self.participant_id,
                                "Endpoint event channel closed"
                            );
                            io.endpoint_events = None;
                        }
                    }
                }

                _ = health.tick() => {
                    if self.machine.state() == PeerState::Connected
                        && !io.endpoint.tracks_live().await
                    {
                        warn!(
                            target: "monitor.actor.peer",
                            participant_id = %self.participant_id,
                            "Inbound tracks no longer live"
                        );
                        return LinkEnd::Local(CloseReason::MediaLost);
                    }
                }

                () = &mut deadline, if negotiating => {
                    warn!(
                        target: "monitor.actor.peer",
                        participant_id = %self.participant_id,
                        state = %self.machine.state(),
                        timeout_ms = self.timings.negotiation_timeout.as_millis(),
                        "Negotiation did not complete in time"
                    );
                    return LinkEnd::Local(CloseReason::NegotiationTimeout);
                }
            }
        }
    }

    async fn on_offer(&mut self, io: &mut LinkIo, envelope: &Envelope) -> Option<CloseReason> {
        let sdp = match self.decode_signal(envelope)? {
            SignalMessage::Offer { sdp } => sdp,
            _ => return None,
        };

        match self.machine.on_offer() {
            OfferDecision::Reject { state } => {
                info!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    state = %state,
                    "Offer rejected, pair is not idle"
                );
                metrics::record_offer_rejected();
                return None;
            }
            OfferDecision::Accept => self.publish_state(),
        }

        let answer = match io.endpoint.apply_offer(&sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Failed to apply offer"
                );
                return Some(CloseReason::NegotiationFailed);
            }
        };

        if !self
            .publish_signal(&SignalMessage::Answer { sdp: answer })
            .await
        {
            return Some(CloseReason::TransportFailed);
        }

        let pending = self.machine.on_answer_published();
        self.publish_state();
        debug!(
            target: "monitor.actor.peer",
            participant_id = %self.participant_id,
            buffered_candidates = pending.len(),
            "Answer published"
        );

        for candidate in pending {
            if let Err(e) = io.endpoint.add_candidate(&candidate).await {
                debug!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Buffered candidate rejected by endpoint"
                );
            }
        }

        None
    }

    async fn on_remote_candidate(&mut self, io: &mut LinkIo, envelope: &Envelope) {
        let Some(SignalMessage::IceCandidate { candidate }) = self.decode_signal(envelope) else {
            return;
        };

        match self.machine.on_remote_candidate(candidate) {
            CandidateAction::Apply(candidate) => {
                if let Err(e) = io.endpoint.add_candidate(&candidate).await {
                    debug!(
                        target: "monitor.actor.peer",
                        participant_id = %self.participant_id,
                        error = %e,
                        "Candidate rejected by endpoint"
                    );
                }
            }
            CandidateAction::Buffered => {
                debug!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    pending = self.machine.pending_candidates(),
                    "Candidate buffered until offer is applied"
                );
            }
            CandidateAction::Dropped => {
                debug!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    state = %self.machine.state(),
                    "Candidate dropped"
                );
            }
        }
    }

    fn is_remote_close(&self, envelope: &Envelope) -> bool {
        matches!(
            self.decode_signal(envelope),
            Some(SignalMessage::Close { .. })
        )
    }

    async fn on_endpoint_event(&mut self, event: EndpointEvent) -> Option<CloseReason> {
        match event {
            EndpointEvent::MediaStarted => {
                if self.machine.on_media_started() {
                    self.publish_state();
                    info!(
                        target: "monitor.actor.peer",
                        participant_id = %self.participant_id,
                        observer_id = %self.observer_id,
                        "Peer link connected"
                    );
                }
                None
            }
            EndpointEvent::LocalCandidate(candidate) => {
                if !self.machine.is_closed() {
                    self.publish_signal(&SignalMessage::IceCandidate { candidate })
                        .await;
                }
                None
            }
            EndpointEvent::IceFailed => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    "ICE connectivity failed"
                );
                Some(CloseReason::NegotiationFailed)
            }
            EndpointEvent::Disconnected => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    state = %self.machine.state(),
                    "Endpoint disconnected"
                );
                Some(CloseReason::MediaLost)
            }
        }
    }

    fn subscription_ended(&self, event: Event) -> LinkEnd {
        warn!(
            target: "monitor.actor.peer",
            participant_id = %self.participant_id,
            event = %event,
            "Uplink subscription ended"
        );
        LinkEnd::Local(CloseReason::TransportFailed)
    }

    /// Decode an uplink message; malformed payloads are logged and skipped.
    fn decode_signal(&self, envelope: &Envelope) -> Option<SignalMessage> {
        match codec::decode::<SignalMessage>(&envelope.event, &envelope.payload, MAX_SIGNAL_BYTES)
        {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    event = %envelope.event,
                    error = %e,
                    "Dropping malformed signaling message"
                );
                None
            }
        }
    }

    /// Publish on the downlink within the publish timeout.
    async fn publish_signal(&self, message: &SignalMessage) -> bool {
        let event = message.event();
        let payload = match codec::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Failed to encode signaling message"
                );
                return false;
            }
        };

        let publish = self
            .transport
            .publish(self.downlink.as_str(), event.as_str(), payload);
        match tokio::time::timeout(self.timings.publish_timeout, publish).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    event = %event,
                    error = %e,
                    "Downlink publish failed"
                );
                false
            }
            Err(_) => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    event = %event,
                    "Downlink publish timed out"
                );
                false
            }
        }
    }

    /// Best-effort `link-request` to the participant's directive topic.
    async fn request_offer(&self) {
        let payload = match codec::encode(&LinkRequest {
            observer_id: self.observer_id,
        }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Failed to encode link request"
                );
                return;
            }
        };

        let topic = Topic::participant(self.session_id, self.participant_id);
        let publish = self
            .transport
            .publish(topic.as_str(), Event::LinkRequest.as_str(), payload);
        match tokio::time::timeout(self.timings.publish_timeout, publish).await {
            Ok(Ok(())) => {
                debug!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    "Link request published"
                );
            }
            Ok(Err(e)) => {
                debug!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    error = %e,
                    "Link request not delivered, waiting for a spontaneous offer"
                );
            }
            Err(_) => {
                debug!(
                    target: "monitor.actor.peer",
                    participant_id = %self.participant_id,
                    "Link request timed out, waiting for a spontaneous offer"
                );
            }
        }
    }

    /// Tell the participant the link is gone. Runs detached so teardown
    /// never waits on the transport.
    fn notify_participant_closed(&self, reason: CloseReason) {
        let payload = match codec::encode(&SignalMessage::Close { reason }) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        let transport = Arc::clone(&self.transport);
        let topic = self.downlink.clone();
        let publish_timeout = self.timings.publish_timeout;
        let participant_id = self.participant_id;

        tokio::spawn(async move {
            let publish = transport.publish(topic.as_str(), Event::Close.as_str(), payload);
            if !matches!(tokio::time::timeout(publish_timeout, publish).await, Ok(Ok(()))) {
                debug!(
                    target: "monitor.actor.peer",
                    participant_id = %participant_id,
                    "Close notification not delivered"
                );
            }
        });
    }

    /// Close the endpoint and drop the uplink subscriptions.
    async fn release(&self, mut io: LinkIo) {
        io.endpoint.close().await;
        for subscription in io.subscriptions() {
            self.unsubscribe(subscription).await;
        }
    }

    async fn unsubscribe(&self, subscription: &Subscription) {
        if let Err(e) = self.transport.unsubscribe(subscription.id()).await {
            debug!(
                target: "monitor.actor.peer",
                subscription_id = %subscription.id(),
                error = %e,
                "Unsubscribe failed"
            );
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_replace(state);
        debug!(
            target: "monitor.actor.peer",
            participant_id = %self.participant_id,
            observer_id = %self.observer_id,
            state = %state,
            "Peer state changed"
        );
    }
}

async fn next_endpoint_event(
    events: &mut Option<mpsc::Receiver<EndpointEvent>>,
) -> Option<EndpointEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_stream_yields_current_then_changes() {
        let (tx, rx) = watch::channel(PeerState::Idle);
        let mut stream = PeerStateStream::new(rx);

        assert_eq!(stream.next().await, Some(PeerState::Idle));

        tx.send_replace(PeerState::Offering);
        assert_eq!(stream.next().await, Some(PeerState::Offering));

        tx.send_replace(PeerState::Closed {
            reason: CloseReason::MediaLost,
        });
        assert_eq!(
            stream.next().await,
            Some(PeerState::Closed {
                reason: CloseReason::MediaLost
            })
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_state_stream_sees_terminal_state_after_sender_dropped() {
        let (tx, rx) = watch::channel(PeerState::AnswerPending);
        let mut stream = PeerStateStream::new(rx);
        assert_eq!(stream.next().await, Some(PeerState::AnswerPending));

        tx.send_replace(PeerState::Closed {
            reason: CloseReason::ViewClosed,
        });
        drop(tx);

        assert_eq!(
            stream.closed().await,
            PeerState::Closed {
                reason: CloseReason::ViewClosed
            }
        );
    }

    #[tokio::test]
    async fn test_state_stream_ends_when_sender_dropped_without_close() {
        let (tx, rx) = watch::channel(PeerState::Idle);
        let mut stream = PeerStateStream::new(rx);
        assert_eq!(stream.next().await, Some(PeerState::Idle));
        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_link_end_reason() {
        assert_eq!(LinkEnd::Remote.reason(), CloseReason::Requested);
        assert_eq!(
            LinkEnd::Local(CloseReason::MediaLost).reason(),
            CloseReason::MediaLost
        );
    }
}

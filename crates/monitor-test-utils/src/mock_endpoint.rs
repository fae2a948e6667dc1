//! Scripted peer endpoints.
//!
//! The factory hands out one `ScriptedPeerEndpoint` per (observer,
//! participant) pair and keeps the endpoint's event sender, so a test can
//! raise `MediaStarted`, `IceFailed` and friends at the moment it chooses.
//! Every call the monitor makes on an endpoint is recorded.

use async_trait::async_trait;
use common::types::{ObserverId, ParticipantId, SessionId};
use monitor_protocol::IceCandidate;
use monitor_service::errors::NegotiationError;
use monitor_service::peer_endpoint::{
    EndpointEvent, EndpointParts, PeerEndpoint, PeerEndpointFactory,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 32;

/// Iterations `wait_for_endpoint` spins before failing the test.
const WAIT_ITERATIONS: usize = 10_000;

/// Default answer returned for any offer.
pub const SCRIPTED_ANSWER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=answer\r\n";

/// Everything the monitor did to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    pub offers: Vec<String>,
    pub candidates: Vec<IceCandidate>,
    pub tracks_live: bool,
    pub close_calls: usize,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            offers: Vec::new(),
            candidates: Vec::new(),
            tracks_live: true,
            close_calls: 0,
        }
    }
}

impl EndpointState {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_calls > 0
    }
}

#[derive(Debug)]
struct EndpointRecord {
    events: mpsc::Sender<EndpointEvent>,
    state: Arc<Mutex<EndpointState>>,
}

#[derive(Debug)]
struct FactoryInner {
    answer: String,
    create_error: Option<NegotiationError>,
    offer_error: Option<NegotiationError>,
    candidate_error: Option<NegotiationError>,
    created: usize,
    endpoints: HashMap<(ObserverId, ParticipantId), EndpointRecord>,
}

impl Default for FactoryInner {
    fn default() -> Self {
        Self {
            answer: SCRIPTED_ANSWER_SDP.to_string(),
            create_error: None,
            offer_error: None,
            candidate_error: None,
            created: 0,
            endpoints: HashMap::new(),
        }
    }
}

/// Mock endpoint factory for testing peer links.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEndpointFactory {
    inner: Arc<Mutex<FactoryInner>>,
}

impl ScriptedEndpointFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer SDP returned for every offer.
    #[must_use]
    pub fn with_answer(self, answer: impl Into<String>) -> Self {
        self.inner.lock().unwrap().answer = answer.into();
        self
    }

    /// Fail every `create` call.
    pub fn fail_create(&self, error: NegotiationError) {
        self.inner.lock().unwrap().create_error = Some(error);
    }

    /// Fail every `apply_offer` on endpoints created from now on.
    pub fn fail_offers(&self, error: NegotiationError) {
        self.inner.lock().unwrap().offer_error = Some(error);
    }

    /// Fail every `add_candidate` on endpoints created from now on.
    pub fn fail_candidates(&self, error: NegotiationError) {
        self.inner.lock().unwrap().candidate_error = Some(error);
    }

    /// Number of endpoints created so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.inner.lock().unwrap().created
    }

    /// State of the most recent endpoint for a pair.
    #[must_use]
    pub fn endpoint(
        &self,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> Option<EndpointState> {
        self.inner
            .lock()
            .unwrap()
            .endpoints
            .get(&(observer_id, participant_id))
            .map(|record| record.state.lock().unwrap().clone())
    }

    /// Raise an event on the pair's endpoint. Returns false if there is no
    /// endpoint or its link has stopped listening.
    pub async fn emit(
        &self,
        observer_id: ObserverId,
        participant_id: ParticipantId,
        event: EndpointEvent,
    ) -> bool {
        let sender = self
            .inner
            .lock()
            .unwrap()
            .endpoints
            .get(&(observer_id, participant_id))
            .map(|record| record.events.clone());

        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn set_tracks_live(
        &self,
        observer_id: ObserverId,
        participant_id: ParticipantId,
        live: bool,
    ) {
        if let Some(record) = self
            .inner
            .lock()
            .unwrap()
            .endpoints
            .get(&(observer_id, participant_id))
        {
            record.state.lock().unwrap().tracks_live = live;
        }
    }

    /// Wait until an endpoint exists for the pair.
    ///
    /// # Panics
    ///
    /// Panics if none is created.
    pub async fn wait_for_endpoint(&self, observer_id: ObserverId, participant_id: ParticipantId) {
        for _ in 0..WAIT_ITERATIONS {
            if self.endpoint(observer_id, participant_id).is_some() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("no endpoint created for {observer_id}/{participant_id}");
    }

    /// Wait until the pair's endpoint has been closed.
    ///
    /// # Panics
    ///
    /// Panics if it stays open.
    pub async fn wait_for_closed(&self, observer_id: ObserverId, participant_id: ParticipantId) {
        for _ in 0..WAIT_ITERATIONS {
            if self
                .endpoint(observer_id, participant_id)
                .is_some_and(|state| state.is_closed())
            {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("endpoint for {observer_id}/{participant_id} was not closed");
    }
}

#[async_trait]
impl PeerEndpointFactory for ScriptedEndpointFactory {
    async fn create(
        &self,
        _session_id: SessionId,
        observer_id: ObserverId,
        participant_id: ParticipantId,
    ) -> Result<EndpointParts, NegotiationError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.create_error.clone() {
            return Err(error);
        }

        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let state = Arc::new(Mutex::new(EndpointState::default()));
        let endpoint = ScriptedPeerEndpoint {
            state: Arc::clone(&state),
            answer: inner.answer.clone(),
            offer_error: inner.offer_error.clone(),
            candidate_error: inner.candidate_error.clone(),
        };

        inner.created += 1;
        inner.endpoints.insert(
            (observer_id, participant_id),
            EndpointRecord {
                events: events_tx,
                state,
            },
        );

        Ok(EndpointParts {
            endpoint: Box::new(endpoint),
            events,
        })
    }
}

/// Endpoint that answers every offer with a fixed SDP.
#[derive(Debug)]
pub struct ScriptedPeerEndpoint {
    state: Arc<Mutex<EndpointState>>,
    answer: String,
    offer_error: Option<NegotiationError>,
    candidate_error: Option<NegotiationError>,
}

#[async_trait]
impl PeerEndpoint for ScriptedPeerEndpoint {
    async fn apply_offer(&mut self, sdp: &str) -> Result<String, NegotiationError> {
        self.state.lock().unwrap().offers.push(sdp.to_string());
        match &self.offer_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.answer.clone()),
        }
    }

    async fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        self.state.lock().unwrap().candidates.push(candidate.clone());
        match &self.candidate_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn tracks_live(&self) -> bool {
        self.state.lock().unwrap().tracks_live
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().close_calls += 1;
    }
}

//! Pre-configured test data fixtures for monitor testing.
//!
//! Provides builders and test data for:
//! - Sessions, roster participants and attempts
//! - Wire payloads a participant client would publish
//! - A fully wired monitor over the in-memory collaborators

use crate::mock_endpoint::ScriptedEndpointFactory;
use crate::mock_stores::MockStores;
use crate::mock_transport::MockTransport;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use common::models::{Attempt, AttemptStatus, Participant, Session, StoredSessionStatus};
use common::types::{AttemptId, CohortId, ObserverId, ParticipantId, SessionId};
use monitor_protocol::codec::encode;
use monitor_protocol::{CloseReason, FrameImage, FrameMessage, IceCandidate, SignalMessage};
use monitor_service::actors::ActorMetrics;
use monitor_service::observability::health::HealthState;
use monitor_service::{Collaborators, MonitorConfig, MonitorControllerActorHandle};
use std::sync::{Arc, Mutex, PoisonError};

/// Offer SDP used by tests that do not care about its content.
pub const TEST_OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 10.0.0.2\r\ns=offer\r\n";

/// Smallest JPEG-looking payload the relay accepts.
pub const TEST_JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

/// Monitor configuration with a fixed instance id.
///
/// Timings keep their defaults so paused-clock tests can reason about
/// them: 5s poll, 10s frame timeout, 1s presence sweep, 500ms frame
/// throttle, 3s peer health check, 20s negotiation timeout, 2s publish
/// timeout.
#[must_use]
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        instance_id: "monitor-test".to_string(),
        ..MonitorConfig::default()
    }
}

/// Test session fixture.
#[derive(Debug, Clone)]
pub struct TestSession {
    session_id: SessionId,
    cohort_id: CohortId,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    status: StoredSessionStatus,
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSession {
    /// An active session that started an hour ago and ends in an hour.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            cohort_id: CohortId::new(),
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(1),
            status: StoredSessionStatus::Active,
        }
    }

    /// Set the scheduled window.
    #[must_use]
    pub fn window(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = starts_at;
        self.ends_at = ends_at;
        self
    }

    /// Set the stored status override.
    #[must_use]
    pub fn status(mut self, status: StoredSessionStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        Session {
            session_id: self.session_id,
            cohort_id: self.cohort_id,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            status: self.status,
        }
    }
}

/// Test roster participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    participant_id: ParticipantId,
    display_name: String,
    cohort_id: CohortId,
}

impl TestParticipant {
    /// Create a participant with the given display name and a random cohort.
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            participant_id: ParticipantId::new(),
            display_name: display_name.into(),
            cohort_id: CohortId::new(),
        }
    }

    /// Put the participant on a cohort roster.
    #[must_use]
    pub fn cohort(mut self, cohort_id: CohortId) -> Self {
        self.cohort_id = cohort_id;
        self
    }

    /// Use a fixed participant id.
    #[must_use]
    pub fn id(mut self, participant_id: ParticipantId) -> Self {
        self.participant_id = participant_id;
        self
    }

    #[must_use]
    pub fn build(self) -> Participant {
        Participant {
            participant_id: self.participant_id,
            display_name: self.display_name,
            cohort_id: self.cohort_id,
        }
    }
}

/// Test attempt fixture.
#[derive(Debug, Clone)]
pub struct TestAttempt {
    attempt: Attempt,
}

impl TestAttempt {
    /// An in-progress attempt on step 1 of 10.
    #[must_use]
    pub fn new(session_id: SessionId, participant_id: ParticipantId) -> Self {
        Self {
            attempt: Attempt {
                attempt_id: AttemptId::new(),
                participant_id,
                session_id,
                status: AttemptStatus::InProgress,
                current_step: 1,
                total_steps: 10,
                last_activity_at: Some(Utc::now()),
                warning_count: 0,
                is_flagged: false,
                camera_enabled: true,
            },
        }
    }

    #[must_use]
    pub fn status(mut self, status: AttemptStatus) -> Self {
        self.attempt.status = status;
        self
    }

    #[must_use]
    pub fn step(mut self, current_step: u32, total_steps: u32) -> Self {
        self.attempt.current_step = current_step;
        self.attempt.total_steps = total_steps;
        self
    }

    #[must_use]
    pub fn last_activity_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.attempt.last_activity_at = at;
        self
    }

    #[must_use]
    pub fn flagged(mut self) -> Self {
        self.attempt.is_flagged = true;
        self
    }

    #[must_use]
    pub fn warnings(mut self, count: u32) -> Self {
        self.attempt.warning_count = count;
        self
    }

    #[must_use]
    pub fn build(self) -> Attempt {
        self.attempt
    }
}

/// Offer a participant client publishes on its uplink.
#[must_use]
pub fn offer_payload(sdp: &str) -> Bytes {
    encode(&SignalMessage::Offer {
        sdp: sdp.to_string(),
    })
    .unwrap()
}

/// Trickled candidate a participant client publishes on its uplink.
#[must_use]
pub fn candidate_payload(candidate: &str) -> Bytes {
    encode(&SignalMessage::IceCandidate {
        candidate: test_candidate(candidate),
    })
    .unwrap()
}

/// Close a participant client publishes on its uplink.
#[must_use]
pub fn close_payload(reason: CloseReason) -> Bytes {
    encode(&SignalMessage::Close { reason }).unwrap()
}

#[must_use]
pub fn test_candidate(candidate: &str) -> IceCandidate {
    IceCandidate {
        candidate: candidate.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    }
}

/// Capture timestamps for test frames, strictly increasing across calls so
/// back-to-back frames are never mistaken for redeliveries.
#[must_use]
pub fn next_capture_time() -> DateTime<Utc> {
    static LAST: Mutex<Option<DateTime<Utc>>> = Mutex::new(None);
    let mut last = LAST.lock().unwrap_or_else(PoisonError::into_inner);
    let now = Utc::now();
    let next = match *last {
        Some(previous) if now <= previous => previous + Duration::microseconds(1),
        _ => now,
    };
    *last = Some(next);
    next
}

/// Inline JPEG frame for a participant, captured now.
#[must_use]
pub fn frame_payload(participant_id: ParticipantId) -> Bytes {
    frame_payload_at(participant_id, next_capture_time())
}

/// Inline JPEG frame with an explicit capture time.
#[must_use]
pub fn frame_payload_at(participant_id: ParticipantId, captured_at: DateTime<Utc>) -> Bytes {
    encode(&FrameMessage {
        participant_id,
        image: FrameImage::Inline {
            data: STANDARD.encode(TEST_JPEG_BYTES),
        },
        mime_type: "image/jpeg".to_string(),
        captured_at,
    })
    .unwrap()
}

/// Frame with an arbitrary image and MIME type.
#[must_use]
pub fn frame_payload_with(
    participant_id: ParticipantId,
    image: FrameImage,
    mime_type: &str,
) -> Bytes {
    encode(&FrameMessage {
        participant_id,
        image,
        mime_type: mime_type.to_string(),
        captured_at: next_capture_time(),
    })
    .unwrap()
}

/// Decode a signaling payload the monitor published.
#[must_use]
pub fn decode_signal(payload: &Bytes) -> SignalMessage {
    serde_json::from_slice(payload).unwrap()
}

/// A monitor wired to in-memory collaborators.
pub struct TestMonitor {
    pub handle: MonitorControllerActorHandle,
    pub transport: MockTransport,
    pub stores: MockStores,
    pub endpoints: ScriptedEndpointFactory,
    pub metrics: Arc<ActorMetrics>,
    pub health: Arc<HealthState>,
    pub observer_id: ObserverId,
}

impl TestMonitor {
    /// Start a monitor with `test_config()`.
    #[must_use]
    pub fn start(stores: MockStores) -> Self {
        Self::start_with(test_config(), stores)
    }

    /// Start a monitor with a custom configuration.
    #[must_use]
    pub fn start_with(config: MonitorConfig, stores: MockStores) -> Self {
        let transport = MockTransport::new();
        let endpoints = ScriptedEndpointFactory::new();
        let metrics = ActorMetrics::new();
        let health = Arc::new(HealthState::new());

        let collaborators = Collaborators {
            transport: Arc::new(transport.clone()),
            rosters: Arc::new(stores.clone()),
            sessions: Arc::new(stores.clone()),
            attempts: Arc::new(stores.clone()),
            endpoints: Arc::new(endpoints.clone()),
        };

        let handle = MonitorControllerActorHandle::new(
            config,
            collaborators,
            Arc::clone(&metrics),
            Arc::clone(&health),
        );

        Self {
            handle,
            transport,
            stores,
            endpoints,
            metrics,
            health,
            observer_id: ObserverId::new(),
        }
    }
}

//! Integration tests for the still-frame relay.
//!
//! Frames are delivered on the session's frames topic as a participant
//! client would publish them; presence and liveness are checked on a
//! paused clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::types::{ParticipantId, SessionId};
use monitor_protocol::{Event, FrameImage, FrameLimits, Topic};
use monitor_service::actors::{ActorMetrics, FrameRelayActor, FrameRelayHandle, RelaySettings};
use monitor_service::roster::Presence;
use chrono::Utc;
use monitor_test_utils::{
    frame_payload, frame_payload_at, frame_payload_with, next_capture_time, MockTransport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn settings() -> RelaySettings {
    RelaySettings {
        frame_timeout: Duration::from_secs(10),
        presence_check_interval: Duration::from_secs(1),
        frame_min_interval: Duration::from_millis(500),
        limits: FrameLimits::from_payload_limit(4096),
        max_tracked_participants: 100,
    }
}

struct Relay {
    topic: Topic,
    transport: MockTransport,
    handle: FrameRelayHandle,
    task: JoinHandle<()>,
}

async fn start_relay(settings: RelaySettings) -> Relay {
    let session_id = SessionId::new();
    let transport = MockTransport::new();
    let (handle, task) = FrameRelayActor::spawn(
        session_id,
        Arc::new(transport.clone()),
        settings,
        CancellationToken::new(),
        ActorMetrics::new(),
    );
    let topic = Topic::frames(session_id);
    transport.wait_for_subscriber(&topic, Event::Frame).await;

    Relay {
        topic,
        transport,
        handle,
        task,
    }
}

impl Relay {
    async fn push(&self, payload: Bytes) {
        assert_eq!(self.transport.deliver(&self.topic, Event::Frame, payload), 1);
        settle().await;
    }

    async fn presence_of(&self, participant_id: ParticipantId) -> Option<Presence> {
        self.handle
            .presence()
            .await
            .unwrap()
            .get(&participant_id)
            .copied()
    }
}

/// Let the relay drain frames already delivered to it.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_latest_frame_kept_per_participant() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();
    let bob = ParticipantId::new();

    relay.push(frame_payload(alice)).await;
    relay.push(frame_payload(bob)).await;

    let latest = relay.handle.latest_frame(alice).await.unwrap().unwrap();
    assert_eq!(latest.frame.participant_id, alice);
    assert!(!latest.stale);
    assert_eq!(relay.presence_of(alice).await, Some(Presence::Online));
    assert_eq!(relay.presence_of(bob).await, Some(Presence::Online));
    assert!(relay
        .handle
        .latest_frame(ParticipantId::new())
        .await
        .unwrap()
        .is_none());

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.online, 2);
}

#[tokio::test(start_paused = true)]
async fn test_liveness_timeout_then_back_online() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();

    relay.push(frame_payload(alice)).await;

    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(relay.presence_of(alice).await, Some(Presence::Online));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(relay.presence_of(alice).await, Some(Presence::Offline));

    // The last frame is retained but reported stale
    let latest = relay.handle.latest_frame(alice).await.unwrap().unwrap();
    assert!(latest.stale);
    assert_eq!(latest.frame.participant_id, alice);

    relay.push(frame_payload(alice)).await;
    assert_eq!(relay.presence_of(alice).await, Some(Presence::Online));
    assert!(!relay.handle.latest_frame(alice).await.unwrap().unwrap().stale);

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.offline, 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_dropped_and_counted() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();

    relay.push(Bytes::from_static(b"not json")).await;
    relay
        .push(frame_payload_with(
            alice,
            FrameImage::Inline {
                data: "/9j/4AAQ".to_string(),
            },
            "image/gif",
        ))
        .await;
    relay
        .push(frame_payload_with(
            alice,
            FrameImage::Inline {
                data: String::new(),
            },
            "image/jpeg",
        ))
        .await;
    relay
        .push(frame_payload_with(
            alice,
            FrameImage::Inline {
                data: "A".repeat(8192),
            },
            "image/jpeg",
        ))
        .await;

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.malformed, 4);
    assert_eq!(stats.accepted, 0);
    assert_eq!(relay.presence_of(alice).await, None);

    // The relay keeps working after bad input
    relay.push(frame_payload(alice)).await;
    assert_eq!(relay.presence_of(alice).await, Some(Presence::Online));
}

#[tokio::test(start_paused = true)]
async fn test_uri_frames_accepted() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();

    relay
        .push(frame_payload_with(
            alice,
            FrameImage::Uri {
                uri: "https://frames.example/alice/1.jpg".to_string(),
            },
            "image/jpeg",
        ))
        .await;

    let latest = relay.handle.latest_frame(alice).await.unwrap().unwrap();
    assert!(matches!(latest.frame.image, FrameImage::Uri { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_fast_frames_throttled() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();

    relay.push(frame_payload(alice)).await;
    relay.push(frame_payload(alice)).await;

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.throttled, 1);

    tokio::time::advance(Duration::from_millis(500)).await;
    relay.push(frame_payload(alice)).await;

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.throttled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_min_interval_disables_throttling() {
    let relay = start_relay(RelaySettings {
        frame_min_interval: Duration::ZERO,
        ..settings()
    })
    .await;
    let alice = ParticipantId::new();

    relay.push(frame_payload(alice)).await;
    relay.push(frame_payload(alice)).await;

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.throttled, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_frame_does_not_replace_newer_one() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();
    let captured_at = next_capture_time();
    let newest = frame_payload_at(alice, captured_at);

    relay.push(newest.clone()).await;

    // A frame captured earlier arrives late, then the newest is redelivered
    tokio::time::advance(Duration::from_secs(1)).await;
    relay
        .push(frame_payload_at(alice, captured_at - chrono::Duration::seconds(5)))
        .await;
    relay.push(newest).await;

    let latest = relay.handle.latest_frame(alice).await.unwrap().unwrap();
    assert_eq!(latest.frame.captured_at, captured_at);

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.out_of_order, 2);
    assert_eq!(stats.throttled, 0);

    // Dropped frames do not extend liveness
    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(relay.presence_of(alice).await, Some(Presence::Offline));
}

#[tokio::test(start_paused = true)]
async fn test_newer_frame_replaces_held_frame() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();
    let first = Utc::now() - chrono::Duration::seconds(30);

    relay.push(frame_payload_at(alice, first)).await;
    tokio::time::advance(Duration::from_secs(1)).await;
    relay.push(frame_payload(alice)).await;

    let latest = relay.handle.latest_frame(alice).await.unwrap().unwrap();
    assert!(latest.frame.captured_at > first);
    assert_eq!(relay.handle.stats().await.unwrap().accepted, 2);
}

#[tokio::test(start_paused = true)]
async fn test_participant_limit_evicts_longest_offline() {
    let relay = start_relay(RelaySettings {
        max_tracked_participants: 2,
        ..settings()
    })
    .await;
    let alice = ParticipantId::new();
    let bob = ParticipantId::new();
    let carol = ParticipantId::new();

    relay.push(frame_payload(alice)).await;
    relay.push(frame_payload(bob)).await;

    // Both tracked participants are online, nobody makes room
    relay.push(frame_payload(carol)).await;
    assert_eq!(relay.presence_of(carol).await, None);
    assert_eq!(relay.handle.stats().await.unwrap().overflow, 1);

    // Both go offline, bob comes back; alice is the one evicted
    tokio::time::advance(Duration::from_secs(10)).await;
    relay.push(frame_payload(bob)).await;
    relay.push(frame_payload(carol)).await;

    assert_eq!(relay.presence_of(alice).await, None);
    assert_eq!(relay.presence_of(bob).await, Some(Presence::Online));
    assert_eq!(relay.presence_of(carol).await, Some(Presence::Online));

    let stats = relay.handle.stats().await.unwrap();
    assert_eq!(stats.accepted, 4);
    assert_eq!(stats.overflow, 1);
    assert_eq!(stats.online, 2);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribes_after_subscription_ends() {
    let relay = start_relay(settings()).await;
    let alice = ParticipantId::new();

    relay.transport.close_topic(&relay.topic);
    settle().await;
    assert_eq!(relay.transport.subscriber_count(&relay.topic, Event::Frame), 0);

    relay.transport.reopen_topic(&relay.topic);
    tokio::time::advance(Duration::from_secs(1)).await;
    relay
        .transport
        .wait_for_subscriber(&relay.topic, Event::Frame)
        .await;

    relay.push(frame_payload(alice)).await;
    assert_eq!(relay.presence_of(alice).await, Some(Presence::Online));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unsubscribes_and_stops() {
    let relay = start_relay(settings()).await;

    relay.handle.cancel();
    relay.task.await.unwrap();

    assert_eq!(relay.transport.subscriber_count(&relay.topic, Event::Frame), 0);
    assert_eq!(relay.transport.unsubscribed().len(), 1);
    assert!(relay.handle.stats().await.is_err());
}

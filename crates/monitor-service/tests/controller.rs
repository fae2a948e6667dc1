//! Integration tests for the monitor controller and its views.
//!
//! Everything goes through the public `MonitorControllerActorHandle`, with
//! the in-memory transport, stores and scripted endpoints standing in for
//! the participant clients and the database.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use common::models::{Attempt, Participant, Session};
use common::types::{AttemptId, ObserverId, ParticipantId};
use monitor_protocol::{CloseReason, Event, Severity, Topic};
use monitor_service::actors::{PeerState, PeerStateStream, SnapshotStream};
use monitor_service::errors::MonitorError;
use monitor_service::roster::Presence;
use monitor_service::MonitorConfig;
use monitor_test_utils::{
    frame_payload, offer_payload, test_config, MockStores, TestAttempt, TestMonitor,
    TestParticipant, TestSession, TEST_OFFER_SDP,
};

// ============================================================================
// Test harness
// ============================================================================

struct Scenario {
    session: Session,
    alice: Participant,
    attempt: Attempt,
    stores: MockStores,
}

/// An active session with one participant who has joined and started.
fn scenario() -> Scenario {
    let session = TestSession::new().build();
    let alice = TestParticipant::new("Alice")
        .cohort(session.cohort_id)
        .build();
    let attempt = TestAttempt::new(session.session_id, alice.participant_id).build();
    let stores = MockStores::new()
        .with_session(session.clone())
        .with_participant(alice.clone())
        .with_joined(session.session_id, alice.participant_id, None)
        .with_attempt(attempt.clone());

    Scenario {
        session,
        alice,
        attempt,
        stores,
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

async fn wait_for_state(states: &mut PeerStateStream, target: PeerState) {
    while let Some(state) = states.next().await {
        if state == target {
            return;
        }
        assert!(!state.is_closed(), "closed while waiting for {target}: {state}");
    }
    panic!("state stream ended before {target}");
}

async fn drain_to_end(snapshots: &mut SnapshotStream) {
    for _ in 0..10 {
        if snapshots.next().await.is_none() {
            return;
        }
    }
    panic!("snapshot stream did not end");
}

// ============================================================================
// View lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_view_streams_roster_snapshot() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());

    let mut snapshots = monitor
        .handle
        .open_monitoring_view(s.session.session_id)
        .await
        .unwrap();
    let snapshot = snapshots.next().await.unwrap();

    assert_eq!(snapshot.session_id, s.session.session_id);
    assert_eq!(snapshot.aggregates.total, 1);
    assert_eq!(snapshot.aggregates.joined, 1);
    assert_eq!(snapshot.aggregates.in_progress, 1);
    let entry = snapshot.entry(s.alice.participant_id).unwrap();
    assert_eq!(entry.display_name.as_deref(), Some("Alice"));
    assert_eq!(entry.attempt_id, Some(s.attempt.attempt_id));

    assert!(monitor.health.is_ready());
    let status = monitor.handle.get_status().await.unwrap();
    assert_eq!(status.view_count, 1);
    assert!(!status.is_draining);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_joins_existing_view() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;

    let mut first = monitor.handle.open_monitoring_view(session_id).await.unwrap();
    let snapshot = first.next().await.unwrap();

    // A second stream starts at the latest snapshot of the same view
    let mut second = monitor.handle.open_monitoring_view(session_id).await.unwrap();
    assert_eq!(second.next().await.unwrap().cycle, snapshot.cycle);

    assert_eq!(monitor.handle.get_status().await.unwrap().view_count, 1);
    assert_eq!(monitor.metrics.view_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_view_limit_enforced() {
    let monitor = TestMonitor::start_with(
        MonitorConfig {
            max_views: 1,
            ..test_config()
        },
        MockStores::new(),
    );
    let first = TestSession::new().build();
    let second = TestSession::new().build();

    assert!(monitor.handle.open_view(first.session_id).await.is_ok());
    let result = monitor.handle.open_view(second.session_id).await;
    let err = result.unwrap_err();
    assert!(matches!(err, MonitorError::CapacityExceeded));
    assert_eq!(err.error_code(), 7);

    // Reopening an existing view does not count against the limit
    assert!(monitor.handle.open_view(first.session_id).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_close_view_ends_streams() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;

    let mut snapshots = monitor.handle.open_monitoring_view(session_id).await.unwrap();
    snapshots.next().await.unwrap();

    monitor.handle.close_monitoring_view(session_id).await.unwrap();
    drain_to_end(&mut snapshots).await;

    assert!(matches!(
        monitor.handle.view(session_id).await,
        Err(MonitorError::ViewNotFound(id)) if id == session_id
    ));
    assert!(matches!(
        monitor.handle.close_monitoring_view(session_id).await,
        Err(MonitorError::ViewNotFound(_))
    ));

    // The session can be observed again with a fresh view
    let mut reopened = monitor.handle.open_monitoring_view(session_id).await.unwrap();
    assert_eq!(reopened.next().await.unwrap().session_id, session_id);
}

#[tokio::test(start_paused = true)]
async fn test_view_operations_need_open_view() {
    let monitor = TestMonitor::start(MockStores::new());
    let session_id = TestSession::new().build().session_id;

    assert!(matches!(
        monitor
            .handle
            .request_peer_link(session_id, monitor.observer_id, ParticipantId::new())
            .await,
        Err(MonitorError::ViewNotFound(_))
    ));
    assert!(matches!(
        monitor
            .handle
            .close_peer_link(session_id, monitor.observer_id, ParticipantId::new())
            .await,
        Err(MonitorError::ViewNotFound(_))
    ));
}

// ============================================================================
// Peer links
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_one_link_per_pair() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;
    let participant_id = s.alice.participant_id;
    let view = monitor.handle.open_view(session_id).await.unwrap();

    let mut first = monitor
        .handle
        .request_peer_link(session_id, monitor.observer_id, participant_id)
        .await
        .unwrap();
    let mut second = monitor
        .handle
        .request_peer_link(session_id, monitor.observer_id, participant_id)
        .await
        .unwrap();

    let uplink = Topic::uplink(session_id, participant_id, monitor.observer_id);
    monitor.transport.wait_for_subscriber(&uplink, Event::Close).await;
    assert_eq!(monitor.endpoints.created_count(), 1);
    assert_eq!(view.status().await.unwrap().peer_links, 1);
    assert_eq!(monitor.handle.get_status().await.unwrap().peer_link_count, 1);

    // Both streams observe the same negotiation
    monitor
        .transport
        .deliver(&uplink, Event::Offer, offer_payload(TEST_OFFER_SDP));
    wait_for_state(&mut first, PeerState::AnswerPending).await;
    wait_for_state(&mut second, PeerState::AnswerPending).await;
}

#[tokio::test(start_paused = true)]
async fn test_links_for_different_observers_are_separate() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;
    let participant_id = s.alice.participant_id;
    let view = monitor.handle.open_view(session_id).await.unwrap();
    let other_observer = ObserverId::new();

    let _mine = view
        .request_peer_link(monitor.observer_id, participant_id)
        .await
        .unwrap();
    let _theirs = view
        .request_peer_link(other_observer, participant_id)
        .await
        .unwrap();

    monitor
        .endpoints
        .wait_for_endpoint(monitor.observer_id, participant_id)
        .await;
    monitor
        .endpoints
        .wait_for_endpoint(other_observer, participant_id)
        .await;
    assert_eq!(monitor.endpoints.created_count(), 2);
    assert_eq!(view.status().await.unwrap().peer_links, 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_peer_link_then_request_again() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;
    let participant_id = s.alice.participant_id;
    monitor.handle.open_view(session_id).await.unwrap();

    let mut states = monitor
        .handle
        .request_peer_link(session_id, monitor.observer_id, participant_id)
        .await
        .unwrap();
    monitor
        .endpoints
        .wait_for_endpoint(monitor.observer_id, participant_id)
        .await;

    assert!(monitor
        .handle
        .close_peer_link(session_id, monitor.observer_id, participant_id)
        .await
        .unwrap());
    assert_eq!(
        states.closed().await,
        PeerState::Closed {
            reason: CloseReason::Requested
        }
    );
    monitor
        .endpoints
        .wait_for_closed(monitor.observer_id, participant_id)
        .await;

    assert!(!monitor
        .handle
        .close_peer_link(session_id, monitor.observer_id, participant_id)
        .await
        .unwrap());

    // A closed pair can be linked again
    let fresh = monitor
        .handle
        .request_peer_link(session_id, monitor.observer_id, participant_id)
        .await
        .unwrap();
    let endpoints = monitor.endpoints.clone();
    wait_until(|| endpoints.created_count() == 2).await;
    assert!(!fresh.current().is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_closing_view_closes_its_links() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;
    let participant_id = s.alice.participant_id;
    monitor.handle.open_view(session_id).await.unwrap();

    let mut states = monitor
        .handle
        .request_peer_link(session_id, monitor.observer_id, participant_id)
        .await
        .unwrap();
    monitor
        .endpoints
        .wait_for_endpoint(monitor.observer_id, participant_id)
        .await;

    monitor.handle.close_monitoring_view(session_id).await.unwrap();

    assert_eq!(
        states.closed().await,
        PeerState::Closed {
            reason: CloseReason::ViewClosed
        }
    );
    monitor
        .endpoints
        .wait_for_closed(monitor.observer_id, participant_id)
        .await;
    let metrics = monitor.metrics.clone();
    wait_until(|| metrics.peer_link_count() == 0).await;
}

// ============================================================================
// Frames and presence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_frames_drive_snapshot_presence() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;
    let participant_id = s.alice.participant_id;
    let view = monitor.handle.open_view(session_id).await.unwrap();
    let snapshots = view.snapshots();

    view.refresh().await.unwrap();
    let entry_presence = |snapshots: &SnapshotStream| {
        snapshots
            .latest()
            .unwrap()
            .entry(participant_id)
            .unwrap()
            .presence
    };
    assert_eq!(entry_presence(&snapshots), Presence::Unknown);

    let frames = Topic::frames(session_id);
    monitor.transport.wait_for_subscriber(&frames, Event::Frame).await;
    assert_eq!(
        monitor
            .transport
            .deliver(&frames, Event::Frame, frame_payload(participant_id)),
        1
    );
    settle().await;

    view.refresh().await.unwrap();
    assert_eq!(entry_presence(&snapshots), Presence::Online);
    let latest = view.latest_frame(participant_id).await.unwrap().unwrap();
    assert!(!latest.stale);

    tokio::time::advance(Duration::from_secs(10)).await;
    view.refresh().await.unwrap();
    assert_eq!(entry_presence(&snapshots), Presence::Offline);
    assert!(view.latest_frame(participant_id).await.unwrap().unwrap().stale);
    assert_eq!(view.relay_stats().await.unwrap().accepted, 1);
}

// ============================================================================
// Warnings and flags
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_warning_does_not_need_open_view() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;
    let participant_id = s.alice.participant_id;

    assert!(
        monitor
            .handle
            .send_warning(session_id, participant_id, "Look at the screen", Severity::Warning)
            .await
    );
    assert_eq!(
        monitor
            .transport
            .published(Topic::participant(session_id, participant_id), Event::Warning)
            .len(),
        1
    );
    assert_eq!(monitor.handle.get_status().await.unwrap().view_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_view_warning_targets_its_session() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;
    let participant_id = s.alice.participant_id;
    let view = monitor.handle.open_view(session_id).await.unwrap();

    assert!(
        view.send_warning(participant_id, "Phone detected", Severity::Critical)
            .await
    );
    assert!(!view.send_warning(participant_id, "", Severity::Info).await);
    assert_eq!(
        monitor
            .transport
            .published(Topic::participant(session_id, participant_id), Event::Warning)
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_view_flag_visible_in_next_snapshot() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let view = monitor.handle.open_view(s.session.session_id).await.unwrap();
    let snapshots = view.snapshots();

    view.flag_participant(s.attempt.attempt_id, true)
        .await
        .unwrap();

    assert!(monitor.stores.attempt(s.attempt.attempt_id).unwrap().is_flagged);
    let snapshot = snapshots.latest().unwrap();
    assert!(snapshot.entry(s.alice.participant_id).unwrap().is_flagged);
    assert_eq!(snapshot.aggregates.flagged, 1);
}

#[tokio::test(start_paused = true)]
async fn test_controller_flag_refreshes_open_views() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let attempt_id = s.attempt.attempt_id;

    let mut snapshots = monitor
        .handle
        .open_monitoring_view(s.session.session_id)
        .await
        .unwrap();
    assert_eq!(snapshots.next().await.unwrap().aggregates.flagged, 0);

    monitor
        .handle
        .flag_participant(attempt_id, true)
        .await
        .unwrap();
    assert!(monitor.stores.attempt(attempt_id).unwrap().is_flagged);

    // The refresh is queued, not awaited
    for _ in 0..5 {
        let snapshot = snapshots.next().await.unwrap();
        if snapshot.aggregates.flagged == 1 {
            return;
        }
    }
    panic!("flag never reached the snapshot");
}

#[tokio::test(start_paused = true)]
async fn test_flag_unknown_attempt_is_store_error() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());

    let result = monitor.handle.flag_participant(AttemptId::new(), true).await;
    assert!(matches!(result, Err(MonitorError::Store(_))));
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_views_and_refuses_new_ones() {
    let s = scenario();
    let monitor = TestMonitor::start(s.stores.clone());
    let session_id = s.session.session_id;

    let mut snapshots = monitor.handle.open_monitoring_view(session_id).await.unwrap();
    snapshots.next().await.unwrap();
    let mut states = monitor
        .handle
        .request_peer_link(session_id, monitor.observer_id, s.alice.participant_id)
        .await
        .unwrap();
    monitor
        .endpoints
        .wait_for_endpoint(monitor.observer_id, s.alice.participant_id)
        .await;

    monitor.handle.shutdown().await.unwrap();
    assert!(!monitor.health.is_ready());

    drain_to_end(&mut snapshots).await;
    assert_eq!(
        states.closed().await,
        PeerState::Closed {
            reason: CloseReason::ViewClosed
        }
    );
    assert!(monitor.handle.open_view(session_id).await.is_err());
}

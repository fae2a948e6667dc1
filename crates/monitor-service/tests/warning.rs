//! Integration tests for warning dispatch.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use common::types::{ParticipantId, SessionId};
use monitor_protocol::{Event, Severity, Topic, WarningMessage};
use monitor_service::warning::WarningDispatcher;
use monitor_test_utils::{test_config, MockTransport};

fn dispatcher(transport: &MockTransport) -> Arc<WarningDispatcher> {
    Arc::new(WarningDispatcher::new(
        Arc::new(transport.clone()),
        &test_config(),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_warning_published_to_participant_topic() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&transport);
    let session_id = SessionId::new();
    let participant_id = ParticipantId::new();

    let sent = dispatcher
        .dispatch(
            session_id,
            participant_id,
            "  Please keep your face in view  ",
            Severity::Warning,
        )
        .await;
    assert!(sent);

    let published = transport.published(
        Topic::participant(session_id, participant_id),
        Event::Warning,
    );
    assert_eq!(published.len(), 1);
    let warning: WarningMessage = serde_json::from_slice(published.first().unwrap()).unwrap();
    assert_eq!(warning.message, "Please keep your face in view");
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.session_id, session_id);
    assert_eq!(warning.participant_id, participant_id);
}

#[tokio::test(start_paused = true)]
async fn test_torn_down_channel_returns_false_and_others_still_delivered() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&transport);
    let session_id = SessionId::new();
    let gone = ParticipantId::new();
    let present = ParticipantId::new();

    transport.close_topic(Topic::participant(session_id, gone));

    assert!(
        !dispatcher
            .dispatch(session_id, gone, "Eyes on screen", Severity::Critical)
            .await
    );
    assert!(
        dispatcher
            .dispatch(session_id, present, "Eyes on screen", Severity::Critical)
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_channel_times_out_without_blocking_others() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&transport);
    let session_id = SessionId::new();
    let hung = ParticipantId::new();
    let healthy = ParticipantId::new();

    transport.hang_publish_to(Topic::participant(session_id, hung));

    let hung_dispatch = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            dispatcher
                .dispatch(session_id, hung, "Microphone muted", Severity::Info)
                .await
        }
    });
    tokio::task::yield_now().await;

    // No time has passed; the healthy participant is not held up
    assert!(
        dispatcher
            .dispatch(session_id, healthy, "Microphone muted", Severity::Info)
            .await
    );
    assert!(!hung_dispatch.is_finished());

    // The hung publish gives up after the publish timeout
    assert!(!hung_dispatch.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_returns_false() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&transport);
    let session_id = SessionId::new();
    let participant_id = ParticipantId::new();

    transport.fail_publish_to(Topic::participant(session_id, participant_id));

    assert!(
        !dispatcher
            .dispatch(session_id, participant_id, "Stay seated", Severity::Warning)
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_messages_never_published() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&transport);
    let session_id = SessionId::new();
    let participant_id = ParticipantId::new();
    let too_long = "x".repeat(test_config().max_warning_chars + 1);

    assert!(
        !dispatcher
            .dispatch(session_id, participant_id, "   ", Severity::Info)
            .await
    );
    assert!(
        !dispatcher
            .dispatch(session_id, participant_id, &too_long, Severity::Info)
            .await
    );
    assert_eq!(transport.publish_count(), 0);
}

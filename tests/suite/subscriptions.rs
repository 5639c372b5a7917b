//! What a view sees through the snapshot, progress and event channels.

use std::time::Duration;

use docent_engine::{Phase, SessionError, SessionEvent, SharedRegistry};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    mount_assistant_append, mount_create, mount_stream, mount_user_append, session, sse_body,
    text_frame,
};

#[tokio::test]
async fn events_arrive_in_order_and_snapshot_tracks_the_answer() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "Explain X").await;
    mount_assistant_append(&server, "c-1", 1).await;
    mount_stream(
        &server,
        sse_body(&[
            text_frame("thinking", "Considering."),
            text_frame("token", "X "),
            text_frame("token", "marks the spot."),
        ]),
        Duration::from_millis(50),
    )
    .await;

    let mut session = session(&server, SharedRegistry::default());
    let mut snapshots = session.subscribe();
    let mut events = session.events();

    session.send("Explain X").await.unwrap();
    assert!(snapshots.has_changed().unwrap());
    {
        let snapshot = snapshots.borrow_and_update();
        assert!(snapshot.is_sending);
        assert!(snapshot.is_streaming);
        assert_eq!(snapshot.phase, Phase::Sending);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.pending.as_ref().unwrap().content, "");
    }

    session.drive().await;

    let snapshot = snapshots.borrow_and_update().clone();
    assert!(!snapshot.is_sending);
    assert!(!snapshot.is_streaming);
    assert_eq!(snapshot.phase, Phase::Completed);
    assert!(snapshot.pending.is_none());
    let transcript: Vec<_> = snapshot.transcript().map(|m| m.content.as_str()).collect();
    assert_eq!(transcript, vec!["Explain X", "X marks the spot."]);

    let Ok(SessionEvent::FirstContentToken { conversation_id }) = events.try_recv() else {
        panic!("first content token should be announced first");
    };
    assert_eq!(conversation_id.as_str(), "c-1");
    let Ok(SessionEvent::Completed { message, .. }) = events.try_recv() else {
        panic!("completion should follow");
    };
    assert_eq!(message.thinking(), "Considering.");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn immediate_second_send_opens_no_second_stream() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "First").await;
    mount_assistant_append(&server, "c-1", 1).await;
    mount_stream(
        &server,
        sse_body(&[text_frame("token", "One answer.")]),
        Duration::from_millis(50),
    )
    .await;

    let mut session = session(&server, SharedRegistry::default());
    session.send("First").await.unwrap();
    assert!(matches!(
        session.send("Second").await,
        Err(SessionError::Busy)
    ));
    session.drive().await;

    assert_eq!(session.messages().len(), 2);
    assert!(!session.take_notices().is_empty());
}

#[tokio::test]
async fn stop_resolves_through_completion_not_error() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "Explain X").await;
    // The stop may abort the request before it reaches the server.
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body(&[text_frame("token", "too late")]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/c-1/cancel"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/conversations/c-1/messages"))
        .and(body_partial_json(json!({
            "role": "assistant",
            "content": "",
            "was_truncated": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-stopped",
            "role": "assistant",
            "content": "",
            "was_truncated": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(&server, SharedRegistry::default());
    let mut events = session.events();
    session.send("Explain X").await.unwrap();
    session.stop().await;
    session.drive().await;

    assert_eq!(session.phase(), Phase::Cancelled);
    assert!(session.snapshot().last_error.is_none());
    let Ok(SessionEvent::Cancelled { message, .. }) = events.try_recv() else {
        panic!("stop should resolve as cancelled");
    };
    assert!(message.is_truncated());
    assert!(session.messages().last().unwrap().is_truncated());
}

//! Generations that outlive the view that started them.

use std::time::Duration;

use docent_engine::{Outcome, SharedRegistry};
use docent_types::Role;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    conversation_id, mount_assistant_append, mount_create, mount_stream, mount_user_append,
    session, sse_body, text_frame,
};

async fn mount_history(server: &MockServer, body: serde_json::Value, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/conversations/c-1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body));
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

#[tokio::test]
async fn detached_generation_is_mirrored_then_reloaded_by_another_view() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "Explain X").await;
    mount_assistant_append(&server, "c-1", 1).await;
    mount_stream(
        &server,
        sse_body(&[text_frame("token", "X is a letter.")]),
        Duration::from_millis(300),
    )
    .await;
    // First load happens while the answer is still streaming.
    mount_history(
        &server,
        json!([{ "id": "m-user", "role": "user", "content": "Explain X" }]),
        Some(1),
    )
    .await;
    mount_history(
        &server,
        json!([
            { "id": "m-user", "role": "user", "content": "Explain X" },
            { "id": "m-answer", "role": "assistant", "content": "X is a letter." }
        ]),
        None,
    )
    .await;

    let registry = SharedRegistry::default();
    let mut first = session(&server, registry.clone());
    first.send("Explain X").await.unwrap();
    let handle = first.detach().expect("generation was running");

    let mut second = session(&server, registry.clone());
    second.open_conversation(conversation_id("c-1")).await.unwrap();
    let snapshot = second.snapshot();
    assert!(snapshot.resumed);
    assert!(snapshot.is_streaming);
    assert!(!second.is_streaming());
    assert!(second.send("Again").await.is_err());

    let outcome = handle.await.unwrap();
    let Outcome::Completed(message) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(message.content, "X is a letter.");
    assert_eq!(message.id.as_str(), "m-answer");
    assert!(registry.is_empty());

    assert!(!second.sync_from_registry().await.unwrap());
    let snapshot = second.snapshot();
    assert!(!snapshot.resumed);
    assert!(snapshot.pending.is_none());
    let roles: Vec<_> = snapshot.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn returning_to_own_generation_renders_it_directly() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "Explain X").await;
    mount_assistant_append(&server, "c-1", 1).await;
    mount_stream(
        &server,
        sse_body(&[text_frame("token", "Back again.")]),
        Duration::from_millis(100),
    )
    .await;
    mount_history(
        &server,
        json!([{ "id": "m-user", "role": "user", "content": "Explain X" }]),
        None,
    )
    .await;

    let registry = SharedRegistry::default();
    let mut session = session(&server, registry.clone());
    session.send("Explain X").await.unwrap();

    session.new_conversation();
    assert_eq!(registry.len(), 1);
    assert_eq!(session.generating_for(), Some(&conversation_id("c-1")));

    session.open_conversation(conversation_id("c-1")).await.unwrap();
    assert!(registry.is_empty());
    assert!(!session.snapshot().resumed);

    session.drive().await;
    let answer = session.messages().last().unwrap();
    assert_eq!(answer.role, Role::Assistant);
    assert_eq!(answer.content, "Back again.");
    assert!(registry.is_empty());
}

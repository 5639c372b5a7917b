//! Shared test utilities and fixtures
//!
//! A mock chat server plus helpers to build sessions against it.

#![allow(dead_code)]

use std::time::Duration;

use docent_client::{AuthToken, HttpApi, ServerEndpoint, StreamClient};
use docent_engine::{SessionOrchestrator, SharedRegistry};
use docent_types::{ConversationConfig, ConversationId};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn conversation_id(id: &str) -> ConversationId {
    ConversationId::new(id).unwrap()
}

/// A session talking to `server`, without credentials.
pub fn session(server: &MockServer, registry: SharedRegistry) -> SessionOrchestrator<HttpApi> {
    session_with(server, registry, None, ConversationConfig::default())
}

pub fn session_with(
    server: &MockServer,
    registry: SharedRegistry,
    token: Option<AuthToken>,
    config: ConversationConfig,
) -> SessionOrchestrator<HttpApi> {
    let endpoint = ServerEndpoint::new(&server.uri(), token).unwrap();
    let http = reqwest::Client::new();
    SessionOrchestrator::new(
        HttpApi::new(http.clone(), endpoint.clone()),
        StreamClient::new(http, endpoint),
        registry,
        config,
    )
}

/// One `data:` frame whose content is a raw text fragment.
pub fn text_frame(kind: &str, content: &str) -> String {
    frame(kind, content)
}

/// One `data:` frame whose content is a JSON-encoded payload.
pub fn json_frame(kind: &str, payload: &Value) -> String {
    frame(kind, &payload.to_string())
}

fn frame(kind: &str, content: &str) -> String {
    let json = json!({ "type": kind, "content": content });
    format!("data: {json}\n\n")
}

/// Concatenate frames and terminate with the `[DONE]` sentinel.
pub fn sse_body(frames: &[String]) -> String {
    let mut body = frames.concat();
    body.push_str("data: [DONE]\n\n");
    body
}

pub async fn mount_create(server: &MockServer, id: &str) {
    Mock::given(method("POST"))
        .and(path("/conversations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": id })))
        .expect(1)
        .mount(server)
        .await;
}

pub async fn mount_user_append(server: &MockServer, id: &str, content: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/conversations/{id}/messages")))
        .and(body_partial_json(json!({ "role": "user", "content": content })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-user",
            "role": "user",
            "content": content
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Accept any assistant message, answering with the server id `m-answer`.
pub async fn mount_assistant_append(server: &MockServer, id: &str, expected: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/conversations/{id}/messages")))
        .and(body_partial_json(json!({ "role": "assistant" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-answer",
            "role": "assistant",
            "content": ""
        })))
        .expect(expected)
        .mount(server)
        .await;
}

pub async fn mount_stream(server: &MockServer, body: String, delay: Duration) {
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/event-stream")
                .set_delay(delay),
        )
        .expect(1)
        .mount(server)
        .await;
}

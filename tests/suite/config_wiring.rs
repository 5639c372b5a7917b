//! A session assembled from a config file, the way the binary builds one.

use std::fs;
use std::time::Duration;

use docent_client::{AuthToken, HttpApi, HttpSettings, ServerEndpoint, StreamClient, http_client};
use docent_config::DocentConfig;
use docent_engine::{RegistryLimits, SessionOrchestrator, SharedRegistry};
use docent_types::ConversationId;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{sse_body, text_frame};

fn write_config(dir: &TempDir, server: &MockServer) -> DocentConfig {
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        format!(
            r#"
[server]
base_url = "{}"
token = "secret-token"
connect_timeout_secs = 5

[registry]
capacity = 2
ttl_secs = 60

[conversation]
knowledge_base_ids = ["kb-default"]
web_search = true
source = "cli"
"#,
            server.uri()
        ),
    )
    .unwrap();
    DocentConfig::load_from(&path).unwrap()
}

fn session_from(config: &DocentConfig) -> (SessionOrchestrator<HttpApi>, SharedRegistry) {
    let endpoint = ServerEndpoint::new(
        &config.base_url().unwrap(),
        config.token().map(AuthToken::new),
    )
    .unwrap();
    let http = http_client(&HttpSettings {
        connect_timeout: config.connect_timeout(),
        https_only: endpoint.is_https(),
    })
    .unwrap();
    let limits = config.registry();
    let registry = SharedRegistry::new(RegistryLimits {
        capacity: limits.capacity,
        ttl: limits.ttl(),
    });
    let session = SessionOrchestrator::new(
        HttpApi::new(http.clone(), endpoint.clone()),
        StreamClient::new(http, endpoint),
        registry.clone(),
        config.conversation_config(),
    );
    (session, registry)
}

#[tokio::test]
async fn configured_defaults_and_token_reach_every_call() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, &server);
    assert_eq!(config.connect_timeout(), Duration::from_secs(5));

    Mock::given(method("POST"))
        .and(path("/conversations"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_partial_json(json!({
            "first_message": "Hi",
            "config": { "knowledge_base_ids": ["kb-default"], "web_search": true, "source": "cli" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "c-7" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/conversations/c-7/messages"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_partial_json(json!({ "role": "user", "content": "Hi" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-1",
            "role": "user",
            "content": "Hi"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/conversations/c-7/messages"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_partial_json(json!({ "role": "assistant", "content": "Hello." })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-2",
            "role": "assistant",
            "content": "Hello."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_partial_json(json!({
            "conversation_id": "c-7",
            "knowledge_base_ids": ["kb-default"],
            "web_search": true,
            "source": "cli"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[text_frame(
            "token", "Hello.",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, registry) = session_from(&config);
    assert_eq!(registry.len(), 0);
    session.send("Hi").await.unwrap();
    session.drive().await;

    assert_eq!(session.conversation_id().unwrap().as_str(), "c-7");
    assert_eq!(session.messages().last().unwrap().content, "Hello.");
    assert!(session.take_notices().is_empty());
}

#[tokio::test]
async fn missing_token_sends_no_authorization() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        format!("[server]\nbase_url = \"{}\"\n", server.uri()),
    )
    .unwrap();
    let config = DocentConfig::load_from(&config_path).unwrap();
    if config.token().is_some() {
        // DOCENT_TOKEN is set in this environment.
        return;
    }

    Mock::given(method("GET"))
        .and(path("/conversations/c-1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, _) = session_from(&config);
    session
        .open_conversation(ConversationId::new("c-1").unwrap())
        .await
        .unwrap();
    assert!(session.messages().is_empty());

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests
            .iter()
            .all(|request| !request.headers.contains_key("authorization"))
    );
}

//! Document summarization progress observed through a whole generation.

use std::sync::Arc;
use std::time::Duration;

use docent_engine::SharedRegistry;
use docent_types::DocumentStatus;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    json_frame, mount_assistant_append, mount_create, mount_stream, mount_user_append, session,
    sse_body, text_frame,
};

#[tokio::test]
async fn cached_and_generated_summaries_settle_in_batch_order() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "Compare the reports").await;
    mount_stream(
        &server,
        sse_body(&[
            json_frame(
                "doc_summary_init",
                &json!({ "total": 2, "cached": 1, "to_generate": 1 }),
            ),
            // Cached documents complete without a start.
            json_frame(
                "doc_summary_complete",
                &json!({
                    "doc_id": "d2", "doc_name": "q2.pdf", "summary": "Q2 was flat.",
                    "from_cache": true, "index": 1, "total": 2
                }),
            ),
            json_frame(
                "doc_summary_start",
                &json!({ "doc_id": "d1", "doc_name": "q1.pdf", "index": 0, "total": 2 }),
            ),
            json_frame("doc_summary_chunk", &json!({ "doc_id": "d1", "content": "Hel" })),
            json_frame("doc_summary_chunk", &json!({ "doc_id": "d1", "content": "lo" })),
            json_frame(
                "doc_summary_complete",
                &json!({
                    "doc_id": "d1", "doc_name": "q1.pdf", "summary": "Hello.",
                    "from_cache": false, "index": 0, "total": 2
                }),
            ),
            text_frame("token", "Q1 grew, Q2 did not."),
        ]),
        Duration::ZERO,
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/conversations/c-1/messages"))
        .and(body_partial_json(json!({
            "role": "assistant",
            "content": "Q1 grew, Q2 did not.",
            "document_summaries": [
                { "doc_id": "d2", "summary": "Q2 was flat.", "from_cache": true },
                { "doc_id": "d1", "summary": "Hello.", "from_cache": false }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-answer",
            "role": "assistant",
            "content": "Q1 grew, Q2 did not."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(&server, SharedRegistry::default());
    let mut progress_rx = session.subscribe_progress();
    session.send("Compare the reports").await.unwrap();
    session.drive().await;

    let progress = session.progress();
    assert!(progress_rx.has_changed().unwrap());
    assert!(Arc::ptr_eq(&progress, &progress_rx.borrow_and_update()));

    let expectation = progress.expectation.unwrap();
    assert_eq!((expectation.total, expectation.cached), (2, 1));
    assert_eq!(progress.len(), 2);
    assert_eq!(progress.finished(), 2);

    let ordered: Vec<_> = progress
        .ordered()
        .into_iter()
        .map(|doc| (doc.doc_id.as_str(), doc.status, doc.summary.as_str()))
        .collect();
    assert_eq!(
        ordered,
        vec![
            ("d1", DocumentStatus::Completed, "Hello."),
            ("d2", DocumentStatus::Cached, "Q2 was flat."),
        ]
    );

    let answer = session.messages().last().unwrap();
    assert_eq!(answer.id.as_str(), "m-answer");
    assert_eq!(answer.document_summaries.len(), 2);
}

#[tokio::test]
async fn chunks_without_a_start_accumulate_into_one_entry() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "Summarize").await;
    mount_assistant_append(&server, "c-1", 1).await;
    mount_stream(
        &server,
        sse_body(&[
            json_frame("doc_summary_chunk", &json!({ "doc_id": "d9", "content": "a" })),
            json_frame("doc_summary_chunk", &json!({ "doc_id": "d9", "content": "b" })),
            json_frame("doc_summary_chunk", &json!({ "doc_id": "d9", "content": "c" })),
            text_frame("token", "Done."),
        ]),
        Duration::ZERO,
    )
    .await;

    let mut session = session(&server, SharedRegistry::default());
    session.send("Summarize").await.unwrap();
    session.drive().await;

    let progress = session.progress();
    assert_eq!(progress.len(), 1);
    let doc = progress.get("d9").unwrap();
    assert_eq!(doc.summary, "abc");
    assert_eq!(doc.status, DocumentStatus::Processing);
}

#[tokio::test]
async fn new_conversation_clears_progress() {
    let server = MockServer::start().await;
    mount_create(&server, "c-1").await;
    mount_user_append(&server, "c-1", "Summarize").await;
    mount_assistant_append(&server, "c-1", 1).await;
    mount_stream(
        &server,
        sse_body(&[
            json_frame(
                "doc_summary_init",
                &json!({ "total": 1, "cached": 0, "to_generate": 1 }),
            ),
            json_frame(
                "doc_summary_start",
                &json!({ "doc_id": "d1", "doc_name": "a.pdf", "index": 0, "total": 1 }),
            ),
            text_frame("token", "Done."),
        ]),
        Duration::ZERO,
    )
    .await;

    let mut session = session(&server, SharedRegistry::default());
    session.send("Summarize").await.unwrap();
    session.drive().await;
    assert_eq!(session.progress().len(), 1);

    session.new_conversation();
    let progress = session.progress();
    assert!(progress.is_empty());
    assert!(progress.expectation.is_none());
}

//! One streaming request per outbound message.
//!
//! [`StreamClient::open`] spawns a task that posts the request, runs the body
//! through [`EventFrameParser`] and forwards events over a bounded channel.
//! Every stream ends with exactly one terminal event:
//!
//! | How it ended | Terminal event |
//! |--------------|----------------|
//! | `[DONE]` sentinel or body closed after data | `Done` |
//! | [`StreamClient::cancel`] | `Done` |
//! | non-2xx status, network failure, empty or oversized body | `Error` |
//! | `error` frame from the server | `Error` |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use docent_types::{ConversationId, StreamEvent};
use futures_util::future::{AbortHandle, Abortable};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::sse::{EventFrameParser, Frame};
use crate::{ServerEndpoint, read_capped_error_body};

const STREAM_EVENT_CHANNEL_CAPACITY: usize = 1024;
const CANCEL_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Body of the open-stream request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    pub conversation_id: ConversationId,
    pub message: String,
    pub knowledge_base_ids: Vec<String>,
    pub document_ids: Vec<String>,
    pub web_search: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Ask the server to regenerate document summaries instead of reusing cached ones.
    pub bypass_cache: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("a stream is already open for conversation {0}")]
    AlreadyOpen(ConversationId),
}

/// Result of [`StreamClient::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No stream was open.
    NotStreaming,
    /// The local request was aborted. `server_acknowledged` reports whether
    /// the advisory cancel call succeeded.
    Aborted { server_acknowledged: bool },
}

/// Receiving side of one open stream.
#[derive(Debug)]
pub struct EventStream {
    conversation_id: ConversationId,
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Wait for the next event. Cancel-safe.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

/// Sending side; guarantees at most one terminal event.
#[derive(Debug, Clone)]
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    finished: Arc<AtomicBool>,
}

impl EventSink {
    /// Forward a non-terminal event. Returns false once the stream is over
    /// or the receiver is gone.
    async fn emit(&self, event: StreamEvent) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    async fn finish(&self, event: StreamEvent) {
        debug_assert!(event.is_terminal());
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(event).await;
    }
}

#[derive(Debug)]
struct InFlight {
    conversation_id: ConversationId,
    abort: AbortHandle,
    finished: Arc<AtomicBool>,
}

impl InFlight {
    fn is_open(&self) -> bool {
        !self.finished.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct StreamClient {
    http: reqwest::Client,
    endpoint: ServerEndpoint,
    in_flight: Option<InFlight>,
}

impl StreamClient {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: ServerEndpoint) -> Self {
        Self {
            http,
            endpoint,
            in_flight: None,
        }
    }

    /// True while the last opened stream has not delivered its terminal event.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.in_flight.as_ref().is_some_and(InFlight::is_open)
    }

    /// Start streaming the answer for `request`.
    ///
    /// Rejected while a previously opened stream is still running.
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self, request: StreamRequest) -> Result<EventStream, StreamError> {
        if let Some(in_flight) = self.in_flight.as_ref().filter(|f| f.is_open()) {
            return Err(StreamError::AlreadyOpen(in_flight.conversation_id.clone()));
        }

        let (tx, rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
        let finished = Arc::new(AtomicBool::new(false));
        let sink = EventSink {
            tx,
            finished: Arc::clone(&finished),
        };
        let (abort, registration) = AbortHandle::new_pair();
        let conversation_id = request.conversation_id.clone();

        let builder = self
            .endpoint
            .authorize(self.http.post(self.endpoint.url(&["chat", "stream"])))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request);

        tracing::debug!(conversation_id = %conversation_id, "Opening chat stream");

        tokio::spawn(async move {
            let outcome = Abortable::new(run_stream(builder, &sink), registration).await;
            if outcome.is_err() {
                tracing::debug!("Chat stream aborted locally");
                sink.finish(StreamEvent::Done).await;
            }
        });

        self.in_flight = Some(InFlight {
            conversation_id: conversation_id.clone(),
            abort,
            finished,
        });

        Ok(EventStream {
            conversation_id,
            rx,
        })
    }

    /// Stop the open stream.
    ///
    /// First asks the server to stop generating (best effort; failure is
    /// logged), then aborts the local request. The stream then ends with
    /// `Done`, never `Error`.
    pub async fn cancel(&mut self) -> CancelOutcome {
        let Some((conversation_id, abort)) = self
            .in_flight
            .as_ref()
            .filter(|f| f.is_open())
            .map(|f| (f.conversation_id.clone(), f.abort.clone()))
        else {
            return CancelOutcome::NotStreaming;
        };

        let server_acknowledged = match self.request_server_cancel(&conversation_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, "Server-side cancel failed: {e}");
                false
            }
        };

        abort.abort();
        CancelOutcome::Aborted {
            server_acknowledged,
        }
    }

    async fn request_server_cancel(&self, conversation_id: &ConversationId) -> Result<(), String> {
        let url = self
            .endpoint
            .url(&["chat", conversation_id.as_str(), "cancel"]);
        let response = self
            .endpoint
            .authorize(self.http.post(url))
            .timeout(Duration::from_secs(CANCEL_REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", response.status()))
        }
    }
}

async fn run_stream(request: reqwest::RequestBuilder, sink: &EventSink) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            sink.finish(StreamEvent::Error(format!("Request failed: {e}")))
                .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let error_text = read_capped_error_body(response).await;
        sink.finish(StreamEvent::Error(format!("API error {status}: {error_text}")))
            .await;
        return;
    }

    let terminal = read_frames(response, sink).await;
    sink.finish(terminal).await;
}

/// Drive the parser over the body; returns the terminal event to deliver.
async fn read_frames(response: reqwest::Response, sink: &EventSink) -> StreamEvent {
    use futures_util::StreamExt;

    let mut body = response.bytes_stream();
    let mut parser = EventFrameParser::new();
    let mut received_bytes = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return StreamEvent::Error(format!("Stream read failed: {e}")),
        };
        received_bytes = received_bytes.saturating_add(chunk.len());

        if let Err(e) = parser.push(&chunk) {
            return StreamEvent::Error(e.to_string());
        }

        while let Some(frame) = parser.next_frame() {
            match frame {
                Frame::Done => return StreamEvent::Done,
                Frame::Event(event) if event.is_terminal() => return event,
                Frame::Event(event) => {
                    if !sink.emit(event).await {
                        return StreamEvent::Done;
                    }
                }
            }
        }
    }

    if received_bytes == 0 {
        return StreamEvent::Error("Response body was empty".to_string());
    }
    parser.finish();
    tracing::debug!(received_bytes, "Chat stream closed without [DONE]");
    StreamEvent::Done
}

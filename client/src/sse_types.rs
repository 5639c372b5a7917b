//! Typed payloads for chat stream frames.
//!
//! Every frame is `{ "type": string, "content": ... }`. For structured kinds
//! the `content` is itself JSON, usually encoded as a string. Parse errors
//! happen at the serde boundary, not scattered through the stream loop.

use docent_types::{
    BatchExpectation, ConversationId, DocSummaryComplete, DocSummaryStart, FinalAnswer,
    StreamEvent,
};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Outer frame envelope.
#[derive(Debug, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

/// The closed set of frame kinds this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Token,
    Thinking,
    FollowUpQuestion,
    FinalAnswer,
    DocSummaryInit,
    DocSummaryStart,
    DocSummaryChunk,
    DocSummaryComplete,
    Error,
}

impl FrameKind {
    #[must_use]
    pub fn from_wire(kind: &str) -> Option<Self> {
        Some(match kind {
            "token" => FrameKind::Token,
            "thinking" => FrameKind::Thinking,
            "follow_up_question" => FrameKind::FollowUpQuestion,
            "final_answer" => FrameKind::FinalAnswer,
            "doc_summary_init" => FrameKind::DocSummaryInit,
            "doc_summary_start" => FrameKind::DocSummaryStart,
            "doc_summary_chunk" => FrameKind::DocSummaryChunk,
            "doc_summary_complete" => FrameKind::DocSummaryComplete,
            "error" => FrameKind::Error,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Token => "token",
            FrameKind::Thinking => "thinking",
            FrameKind::FollowUpQuestion => "follow_up_question",
            FrameKind::FinalAnswer => "final_answer",
            FrameKind::DocSummaryInit => "doc_summary_init",
            FrameKind::DocSummaryStart => "doc_summary_start",
            FrameKind::DocSummaryChunk => "doc_summary_chunk",
            FrameKind::DocSummaryComplete => "doc_summary_complete",
            FrameKind::Error => "error",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FollowUpQuestionPayload {
    pub question: String,
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct FinalAnswerPayload {
    #[serde(default)]
    pub answer: String,
    #[serde(default, deserialize_with = "opt_lenient_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    #[serde(default)]
    pub detected_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocSummaryInitPayload {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub cached: usize,
    #[serde(default)]
    pub to_generate: usize,
}

#[derive(Debug, Deserialize)]
pub struct DocSummaryStartPayload {
    #[serde(deserialize_with = "lenient_id")]
    pub doc_id: String,
    #[serde(default)]
    pub doc_name: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct DocSummaryChunkPayload {
    #[serde(deserialize_with = "lenient_id")]
    pub doc_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct DocSummaryCompletePayload {
    #[serde(deserialize_with = "lenient_id")]
    pub doc_id: String,
    #[serde(default)]
    pub doc_name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub total: usize,
}

/// Why a frame could not be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("unknown frame type {0:?}")]
    UnknownKind(String),
    #[error("{kind} frame content must be a string")]
    ExpectedText { kind: &'static str },
    #[error("invalid {kind} payload: {source}")]
    Invalid {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl RawFrame {
    /// Validate the envelope against the closed kind set and decode its payload.
    pub fn into_event(self) -> Result<StreamEvent, PayloadError> {
        let kind = FrameKind::from_wire(&self.kind).ok_or(PayloadError::UnknownKind(self.kind))?;
        let content = self.content;

        let event = match kind {
            FrameKind::Token => StreamEvent::Token(text(kind, content)?),
            FrameKind::Thinking => StreamEvent::Thinking(text(kind, content)?),
            FrameKind::Error => StreamEvent::Error(match content {
                Value::String(message) => message,
                Value::Null => "Stream reported an error".to_string(),
                other => other.to_string(),
            }),
            FrameKind::FollowUpQuestion => {
                let payload: FollowUpQuestionPayload = structured(kind, content)?;
                StreamEvent::FollowUpQuestion {
                    question: payload.question,
                    index: payload.index,
                }
            }
            FrameKind::FinalAnswer => {
                let payload: FinalAnswerPayload = structured(kind, content)?;
                StreamEvent::FinalAnswer(FinalAnswer {
                    answer: payload.answer,
                    session_id: payload
                        .session_id
                        .and_then(|id| ConversationId::new(id).ok()),
                    follow_up_questions: payload.follow_up_questions,
                    detected_intent: payload.detected_intent.filter(|s| !s.is_empty()),
                })
            }
            FrameKind::DocSummaryInit => {
                let payload: DocSummaryInitPayload = structured(kind, content)?;
                StreamEvent::DocSummaryInit(BatchExpectation {
                    total: payload.total,
                    cached: payload.cached,
                    to_generate: payload.to_generate,
                })
            }
            FrameKind::DocSummaryStart => {
                let payload: DocSummaryStartPayload = structured(kind, content)?;
                StreamEvent::DocSummaryStart(DocSummaryStart {
                    doc_id: payload.doc_id,
                    doc_name: payload.doc_name,
                    index: payload.index,
                    total: payload.total,
                })
            }
            FrameKind::DocSummaryChunk => {
                let payload: DocSummaryChunkPayload = structured(kind, content)?;
                StreamEvent::DocSummaryChunk {
                    doc_id: payload.doc_id,
                    content: payload.content,
                }
            }
            FrameKind::DocSummaryComplete => {
                let payload: DocSummaryCompletePayload = structured(kind, content)?;
                StreamEvent::DocSummaryComplete(DocSummaryComplete {
                    doc_id: payload.doc_id,
                    doc_name: payload.doc_name,
                    summary: payload.summary,
                    from_cache: payload.from_cache,
                    index: payload.index,
                    total: payload.total,
                })
            }
        };
        Ok(event)
    }
}

fn text(kind: FrameKind, content: Value) -> Result<String, PayloadError> {
    match content {
        Value::String(text) => Ok(text),
        _ => Err(PayloadError::ExpectedText {
            kind: kind.as_str(),
        }),
    }
}

/// Structured payloads arrive JSON-encoded inside a string; inline objects are accepted too.
fn structured<T: DeserializeOwned>(kind: FrameKind, content: Value) -> Result<T, PayloadError> {
    let result = match content {
        Value::String(encoded) => serde_json::from_str(&encoded),
        other => serde_json::from_value(other),
    };
    result.map_err(|source| PayloadError::Invalid {
        kind: kind.as_str(),
        source,
    })
}

/// Document and session ids are strings on most servers, integers on some.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

pub(crate) fn opt_lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(id) => Ok(Some(id)),
        Value::Number(id) => Ok(Some(id.to_string())),
        other => Err(de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

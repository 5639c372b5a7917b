//! Conversation and message RPCs consumed by the session engine.

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use docent_types::{
    Conversation, ConversationConfig, ConversationConfigPatch, ConversationId, DocumentSummary,
    Message, MessageId, Role, TruncationInfo,
};
use serde::{Deserialize, Serialize};

use crate::ServerEndpoint;
use crate::sse_types::lenient_id;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{operation} returned an unreadable body: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A message to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub document_summaries: Vec<DocumentSummary>,
    pub truncation: Option<TruncationInfo>,
}

impl NewMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            thinking: None,
            document_summaries: Vec::new(),
            truncation: None,
        }
    }

    /// The persistable part of a finished assistant message.
    #[must_use]
    pub fn assistant_from(message: &Message) -> Self {
        Self {
            role: Role::Assistant,
            content: message.content.clone(),
            thinking: message.thinking.clone().filter(|t| !t.is_empty()),
            document_summaries: message.document_summaries.clone(),
            truncation: message.truncation,
        }
    }
}

/// The server calls the session engine depends on.
///
/// Implementations must be cheap to share; the engine holds one per session.
pub trait ConversationApi: Send + Sync {
    fn create_conversation(
        &self,
        first_message: &str,
        config: &ConversationConfig,
    ) -> impl Future<Output = Result<Conversation, ApiError>> + Send;

    fn update_conversation_config(
        &self,
        id: &ConversationId,
        patch: &ConversationConfigPatch,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn append_message(
        &self,
        id: &ConversationId,
        message: &NewMessage,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn list_messages(
        &self,
        id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn delete_message(
        &self,
        id: &ConversationId,
        message_id: &MessageId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Serialize)]
struct CreateConversationBody<'a> {
    first_message: &'a str,
    config: &'a ConversationConfig,
}

#[derive(Deserialize)]
struct ConversationDto {
    #[serde(alias = "conversation_id", deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    config: Option<ConversationConfig>,
}

#[derive(Serialize)]
struct AppendMessageBody<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<&'a str>,
    #[serde(skip_serializing_if = "slice_is_empty")]
    document_summaries: &'a [DocumentSummary],
    was_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncated_at: Option<String>,
}

fn slice_is_empty<T>(items: &&[T]) -> bool {
    items.is_empty()
}

impl<'a> From<&'a NewMessage> for AppendMessageBody<'a> {
    fn from(message: &'a NewMessage) -> Self {
        Self {
            role: message.role,
            content: &message.content,
            thinking: message.thinking.as_deref(),
            document_summaries: &message.document_summaries,
            was_truncated: message.truncation.is_some(),
            truncated_at: message
                .truncation
                .map(|t| DateTime::<Utc>::from(t.truncated_at).to_rfc3339()),
        }
    }
}

#[derive(Deserialize)]
struct MessageDto {
    #[serde(deserialize_with = "lenient_id")]
    id: String,
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    follow_up_questions: Vec<String>,
    #[serde(default)]
    detected_intent: Option<String>,
    #[serde(default)]
    document_summaries: Vec<DocumentSummary>,
    #[serde(default)]
    was_truncated: bool,
    #[serde(default)]
    truncated_at: Option<String>,
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        let truncation = dto.was_truncated.then(|| TruncationInfo {
            truncated_at: dto
                .truncated_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map_or(UNIX_EPOCH, SystemTime::from),
        });
        Message {
            id: MessageId::new(dto.id),
            role: dto.role,
            content: dto.content,
            thinking: dto.thinking.filter(|t| !t.is_empty()),
            follow_up_questions: dto.follow_up_questions,
            detected_intent: dto.detected_intent,
            document_summaries: dto.document_summaries,
            truncation,
        }
    }
}

/// Servers answer list-messages either with a bare array or wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum MessageList {
    Bare(Vec<MessageDto>),
    Wrapped { messages: Vec<MessageDto> },
}

/// reqwest-backed [`ConversationApi`].
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    endpoint: ServerEndpoint,
}

impl HttpApi {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: ServerEndpoint) -> Self {
        Self { http, endpoint }
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = self
            .endpoint
            .authorize(request)
            .send()
            .await
            .map_err(|source| ApiError::Transport { operation, source })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = crate::read_capped_error_body(response).await;
            Err(ApiError::Status {
                operation,
                status,
                body,
            })
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ApiError::Transport { operation, source })?;
        serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode { operation, source })
    }
}

impl ConversationApi for HttpApi {
    async fn create_conversation(
        &self,
        first_message: &str,
        config: &ConversationConfig,
    ) -> Result<Conversation, ApiError> {
        const OP: &str = "create-conversation";
        let request = self
            .http
            .post(self.endpoint.url(&["conversations"]))
            .json(&CreateConversationBody {
                first_message,
                config,
            });
        let dto: ConversationDto = Self::json(OP, self.send(OP, request).await?).await?;
        let id = ConversationId::new(dto.id).map_err(|e| ApiError::Decode {
            operation: OP,
            source: serde::de::Error::custom(e),
        })?;
        Ok(Conversation {
            id,
            config: dto.config.unwrap_or_else(|| config.clone()),
        })
    }

    async fn update_conversation_config(
        &self,
        id: &ConversationId,
        patch: &ConversationConfigPatch,
    ) -> Result<(), ApiError> {
        let request = self
            .http
            .patch(self.endpoint.url(&["conversations", id.as_str()]))
            .json(patch);
        self.send("update-conversation-config", request).await?;
        Ok(())
    }

    async fn append_message(
        &self,
        id: &ConversationId,
        message: &NewMessage,
    ) -> Result<Message, ApiError> {
        const OP: &str = "append-message";
        let request = self
            .http
            .post(self.endpoint.url(&["conversations", id.as_str(), "messages"]))
            .json(&AppendMessageBody::from(message));
        let dto: MessageDto = Self::json(OP, self.send(OP, request).await?).await?;
        Ok(dto.into())
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, ApiError> {
        const OP: &str = "list-messages";
        let request = self
            .http
            .get(self.endpoint.url(&["conversations", id.as_str(), "messages"]));
        let list: MessageList = Self::json(OP, self.send(OP, request).await?).await?;
        let dtos = match list {
            MessageList::Bare(dtos) | MessageList::Wrapped { messages: dtos } => dtos,
        };
        Ok(dtos.into_iter().map(Message::from).collect())
    }

    async fn delete_message(
        &self,
        id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        let request = self.http.delete(self.endpoint.url(&[
            "conversations",
            id.as_str(),
            "messages",
            message_id.as_str(),
        ]));
        self.send("delete-message", request).await?;
        Ok(())
    }
}

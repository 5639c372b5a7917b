//! Chat message domain model.
//!
//! Timestamps are `SystemTime`; callers own the clock.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Follow-up slots a message holds; later indexes are dropped.
pub const MAX_FOLLOW_UPS: usize = 16;

/// Summary of one document produced during a generation, kept for history replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    #[serde(default)]
    pub doc_name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub from_cache: bool,
}

/// Marks an assistant message that was cut short by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationInfo {
    pub truncated_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_summaries: Vec<DocumentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<TruncationInfo>,
}

impl Message {
    #[must_use]
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::empty(id, Role::User).with_content(content)
    }

    /// An assistant message with no content yet, as created when a generation starts.
    #[must_use]
    pub fn pending_assistant(id: MessageId) -> Self {
        Self::empty(id, Role::Assistant)
    }

    fn empty(id: MessageId, role: Role) -> Self {
        Self {
            id,
            role,
            content: String::new(),
            thinking: None,
            follow_up_questions: Vec::new(),
            detected_intent: None,
            document_summaries: Vec::new(),
            truncation: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }

    #[must_use]
    pub fn thinking(&self) -> &str {
        self.thinking.as_deref().unwrap_or("")
    }

    pub fn append_content(&mut self, fragment: &str) {
        self.content.push_str(fragment);
    }

    pub fn append_thinking(&mut self, fragment: &str) {
        self.thinking
            .get_or_insert_with(String::new)
            .push_str(fragment);
    }

    /// Place a follow-up question at `index`, padding any gap with empty slots.
    ///
    /// Returns false, leaving the list untouched, when `index` is not below
    /// [`MAX_FOLLOW_UPS`].
    pub fn set_follow_up(&mut self, index: usize, question: String) -> bool {
        if index >= MAX_FOLLOW_UPS {
            return false;
        }
        if self.follow_up_questions.len() <= index {
            self.follow_up_questions.resize(index + 1, String::new());
        }
        self.follow_up_questions[index] = question;
        true
    }

    /// Record a document summary, replacing any earlier one for the same document.
    pub fn record_document_summary(&mut self, summary: DocumentSummary) {
        match self
            .document_summaries
            .iter_mut()
            .find(|existing| existing.doc_id == summary.doc_id)
        {
            Some(existing) => *existing = summary,
            None => self.document_summaries.push(summary),
        }
    }
}

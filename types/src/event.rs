//! Typed events decoded from a chat stream.

use crate::{BatchExpectation, ConversationId};

/// Terminal answer payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalAnswer {
    pub answer: String,
    pub session_id: Option<ConversationId>,
    pub follow_up_questions: Vec<String>,
    pub detected_intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSummaryStart {
    pub doc_id: String,
    pub doc_name: String,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSummaryComplete {
    pub doc_id: String,
    pub doc_name: String,
    pub summary: String,
    pub from_cache: bool,
    pub index: usize,
    pub total: usize,
}

/// One event of a generation, in arrival order.
///
/// Exactly one of `Done` or `Error` ends every stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Reasoning trace fragment.
    Thinking(String),
    /// Answer text fragment.
    Token(String),
    FollowUpQuestion {
        question: String,
        index: usize,
    },
    FinalAnswer(FinalAnswer),
    DocSummaryInit(BatchExpectation),
    DocSummaryStart(DocSummaryStart),
    DocSummaryChunk {
        doc_id: String,
        content: String,
    },
    DocSummaryComplete(DocSummaryComplete),
    /// Transport or server failure. Terminal.
    Error(String),
    /// Stream finished, either naturally or because it was aborted. Terminal.
    Done,
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}

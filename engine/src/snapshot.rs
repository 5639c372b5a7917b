//! What subscribers see.

use docent_types::{ConversationConfig, ConversationId, Message};

use crate::generation::Phase;
use crate::notices::Notice;

/// Consistent view of a session, rebuilt on every publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub config: ConversationConfig,
    /// Persisted history, oldest first.
    pub messages: Vec<Message>,
    /// The assistant message being generated for the displayed conversation.
    pub pending: Option<Message>,
    pub phase: Phase,
    pub is_sending: bool,
    pub is_streaming: bool,
    /// `pending` mirrors a generation owned by another session.
    pub resumed: bool,
    pub notices: Vec<Notice>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// History followed by the pending message, if any.
    pub fn transcript(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().chain(self.pending.as_ref())
    }
}

/// Lifecycle signals, delivered once each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// First answer token after a reasoning trace.
    FirstContentToken { conversation_id: ConversationId },
    Completed {
        conversation_id: ConversationId,
        message: Message,
    },
    /// Stopped by the user; `message` was saved as truncated.
    Cancelled {
        conversation_id: ConversationId,
        message: Message,
    },
    Errored {
        conversation_id: ConversationId,
        error: String,
    },
}

impl SessionEvent {
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::FirstContentToken { conversation_id }
            | Self::Completed {
                conversation_id, ..
            }
            | Self::Cancelled {
                conversation_id, ..
            }
            | Self::Errored {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

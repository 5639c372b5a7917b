//! Non-fatal conditions surfaced to the user.

use std::collections::VecDeque;

use docent_types::ConversationId;

const MAX_NOTICES: usize = 16;

/// Something the user should know about that did not fail the session.
///
/// This is a closed enum; each variant is one condition the engine detects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The finished assistant message could not be saved. It stays visible
    /// until the conversation is reloaded.
    PersistFailed {
        conversation_id: ConversationId,
        reason: String,
    },
    /// The server did not confirm the stop request; the local stream was
    /// aborted regardless.
    CancelNotAcknowledged { conversation_id: ConversationId },
    /// A send arrived while another generation was still running.
    SendRejected,
}

impl Notice {
    #[must_use]
    pub fn format(&self) -> String {
        match self {
            Self::PersistFailed { reason, .. } => {
                format!("Answer was not saved and will be lost on reload: {reason}")
            }
            Self::CancelNotAcknowledged { .. } => {
                "Server did not confirm the stop; generation may continue server-side".to_string()
            }
            Self::SendRejected => "A response is still being generated".to_string(),
        }
    }
}

/// Bounded, most-recent-last log of notices.
#[derive(Debug, Default, Clone)]
pub struct NoticeLog {
    notices: VecDeque<Notice>,
}

impl NoticeLog {
    /// Record a notice. A repeat of the newest notice is dropped.
    pub fn push(&mut self, notice: Notice) {
        if self.notices.back() == Some(&notice) {
            return;
        }
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Notice> {
        self.notices.iter().cloned().collect()
    }

    /// Remove and return all notices.
    pub fn drain(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}

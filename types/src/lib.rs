//! Core domain types for Docent.
//!
//! Conversations, messages, stream events and summarization progress. Plain
//! data with serde derives; the client and engine crates add the IO.

mod conversation;
mod event;
mod ids;
mod message;
mod progress;

pub use conversation::{Conversation, ConversationConfig, ConversationConfigPatch};
pub use event::{DocSummaryComplete, DocSummaryStart, FinalAnswer, StreamEvent};
pub use ids::{ConversationId, EmptyIdError, MessageId};
pub use message::{DocumentSummary, MAX_FOLLOW_UPS, Message, Role, TruncationInfo};
pub use progress::{BatchExpectation, DocumentProgress, DocumentStatus};

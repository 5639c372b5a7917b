use docent_client::{ApiError, StreamError};
use docent_types::ConversationId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("a response is still being generated")]
    Busy,
    #[error("conversation {0} is generating in another session")]
    GeneratingElsewhere(ConversationId),
    #[error("no conversation is open")]
    NoConversation,
    #[error("there is no user message to regenerate from")]
    NothingToRegenerate,
    #[error("conversation retrieval scope is locked")]
    ConfigLocked,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

use thiserror::Error;

use crate::repositories::RepositoryError;

/// Caller contract violations against the conversation store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("turn index {index} out of range (history has {len} turns)")]
    TurnOutOfRange { index: usize, len: usize },

    #[error("conversation {0} has no trailing user turn to answer")]
    NoPendingUserTurn(String),

    #[error("conversation {0} is already streaming a response")]
    Busy(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// No completion client is configured. Terminal, never retried.
    #[error("completion client not configured")]
    Configuration,

    /// The completion stream failed after it was opened.
    #[error("stream failed: {0}")]
    Stream(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),
}

pub type ChatResult<T> = Result<T, ChatError>;

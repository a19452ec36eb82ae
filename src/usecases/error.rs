use thiserror::Error;

use crate::domain::ids::{ConversationId, MessageId};

use super::contracts::ApiError;

/// Input rejected before any optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message has neither text nor media")]
    EmptyMessage,
    #[error("edit window of {window_ms} ms has passed")]
    EditWindowExceeded { window_ms: i64 },
    #[error("only the author can change this message")]
    NotAuthor,
    #[error("message is still waiting for confirmation")]
    MessagePending,
    #[error("message was already deleted")]
    AlreadyDeleted,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "VALIDATION_EMPTY_MESSAGE",
            Self::EditWindowExceeded { .. } => "VALIDATION_EDIT_WINDOW_EXCEEDED",
            Self::NotAuthor => "VALIDATION_NOT_AUTHOR",
            Self::MessagePending => "VALIDATION_MESSAGE_PENDING",
            Self::AlreadyDeleted => "VALIDATION_ALREADY_DELETED",
        }
    }
}

/// Failure of one synchronization operation. Scoped to a single conversation
/// or message; none is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("network failure: {0}")]
    Network(#[from] ApiError),
    #[error("validation failure: {0}")]
    Validation(#[from] ValidationError),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("conversation {0} is not open")]
    ConversationNotOpen(ConversationId),
    #[error("message {0} is not cached")]
    MessageNotFound(MessageId),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(error) => error.code(),
            Self::Validation(error) => error.code(),
            Self::Cancelled => "SYNC_CANCELLED",
            Self::ConversationNotOpen(_) => "SYNC_CONVERSATION_NOT_OPEN",
            Self::MessageNotFound(_) => "SYNC_MESSAGE_NOT_FOUND",
        }
    }
}

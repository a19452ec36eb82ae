//! Collaborators consumed by the synchronization use cases.

use std::{
    future::Future,
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

use crate::domain::{
    conversation::Conversation,
    ids::{ConversationId, MessageId},
    message::{MediaRef, Message},
};

/// Opaque backward-pagination position: the oldest loaded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub before_id: MessageId,
    pub before_created_at_ms: i64,
}

impl PageCursor {
    pub fn of(message: &Message) -> Self {
        Self {
            before_id: message.id.clone(),
            before_created_at_ms: message.created_at_ms,
        }
    }

    /// Whether `message` sits strictly before this cursor in timeline order.
    pub fn admits(&self, message: &Message) -> bool {
        (message.created_at_ms, &message.id) < (self.before_created_at_ms, &self.before_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<PageCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub content: Option<String>,
    pub media: Vec<MediaRef>,
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request is not authorized")]
    Unauthorized,
    #[error("request timed out")]
    Timeout,
    #[error("service is temporarily unavailable")]
    Unavailable,
    #[error("resource was not found")]
    NotFound,
    #[error("request was rejected: {0}")]
    Rejected(String),
    #[error("response violated the data contract")]
    InvalidData,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "API_UNAUTHORIZED",
            Self::Timeout => "API_TIMEOUT",
            Self::Unavailable => "API_UNAVAILABLE",
            Self::NotFound => "API_NOT_FOUND",
            Self::Rejected(_) => "API_REJECTED",
            Self::InvalidData => "API_INVALID_DATA",
        }
    }
}

/// Conversation/message REST service. Implementations attach the bearer
/// credential themselves.
pub trait MessageApi: Send + Sync + 'static {
    fn list_conversations(&self)
        -> impl Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<&PageCursor>,
        limit: usize,
    ) -> impl Future<Output = Result<FetchedPage, ApiError>> + Send;

    fn create_message(
        &self,
        message: &NewMessage,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn edit_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        content: &str,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn send_typing(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

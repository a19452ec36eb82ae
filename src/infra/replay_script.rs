//! Replay script: seeded backend data plus a list of steps driven through
//! the sync service.

use std::{fs, path::Path};

use serde::Deserialize;

use crate::{
    domain::{
        conversation::Conversation,
        events::{ConversationRow, RealtimeEvent, UserChannelEvent},
        ids::{ConversationId, MessageId, UserId},
        message::{DeliveryStatus, MediaRef, Message, ReadReceipt, SenderProfile},
    },
    infra::error::AppError,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplayScript {
    pub viewer: UserId,
    /// Clock start. Defaults to the wall clock.
    #[serde(default)]
    pub start_at_ms: Option<i64>,
    #[serde(default)]
    pub conversations: Vec<ConversationRow>,
    #[serde(default)]
    pub messages: Vec<ScriptMessage>,
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
}

/// Message held by the scripted backend before the replay starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptMessage {
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    pub created_at_ms: i64,
    #[serde(default)]
    pub edited_at_ms: Option<i64>,
    #[serde(default)]
    pub read_by: Vec<UserId>,
}

impl ScriptMessage {
    pub fn to_message(&self) -> Message {
        let id = MessageId::server(self.id.clone());
        Message {
            read_receipts: self
                .read_by
                .iter()
                .map(|user_id| ReadReceipt {
                    message_id: id.clone(),
                    user_id: user_id.clone(),
                    read_at_ms: self.created_at_ms,
                })
                .collect(),
            id,
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            sender: self.sender_name.as_ref().map(|name| SenderProfile {
                display_name: name.clone(),
                avatar_url: None,
            }),
            content: self.content.clone(),
            media: self.media.clone(),
            reply_to: self.reply_to.clone(),
            created_at_ms: self.created_at_ms,
            edited_at_ms: self.edited_at_ms,
            deleted_at_ms: None,
            status: DeliveryStatus::Confirmed,
        }
    }
}

pub fn conversation_from_row(row: &ConversationRow) -> Conversation {
    let mut conversation = Conversation::new(row.id.clone(), row.kind);
    conversation.title = row.title.clone();
    conversation.participants = row.participants.iter().cloned().collect();
    conversation
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayStep {
    Open {
        conversation_id: ConversationId,
    },
    Leave {
        conversation_id: ConversationId,
    },
    LoadOlder {
        conversation_id: ConversationId,
    },
    Send {
        conversation_id: ConversationId,
        text: String,
        #[serde(default)]
        reply_to: Option<MessageId>,
    },
    Edit {
        conversation_id: ConversationId,
        message_id: MessageId,
        text: String,
    },
    Delete {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    /// Empty `message_ids` marks every cached message.
    MarkRead {
        conversation_id: ConversationId,
        #[serde(default)]
        message_ids: Vec<MessageId>,
    },
    /// Without `user_id` the keystroke is the viewer's own.
    Typing {
        conversation_id: ConversationId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    TypingStop {
        conversation_id: ConversationId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    Realtime {
        event: RealtimeEvent,
    },
    User {
        event: UserChannelEvent,
    },
    Disconnect {
        conversation_id: ConversationId,
    },
    Reconnect {
        conversation_id: ConversationId,
    },
    Refresh,
    Resync,
    Advance {
        ms: i64,
    },
    /// Makes the next call of one backend operation fail.
    FailNext {
        operation: String,
    },
    Show {
        conversation_id: ConversationId,
    },
}

impl ReplayStep {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Leave { .. } => "leave",
            Self::LoadOlder { .. } => "load_older",
            Self::Send { .. } => "send",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::MarkRead { .. } => "mark_read",
            Self::Typing { .. } => "typing",
            Self::TypingStop { .. } => "typing_stop",
            Self::Realtime { .. } => "realtime",
            Self::User { .. } => "user",
            Self::Disconnect { .. } => "disconnect",
            Self::Reconnect { .. } => "reconnect",
            Self::Refresh => "refresh",
            Self::Resync => "resync",
            Self::Advance { .. } => "advance",
            Self::FailNext { .. } => "fail_next",
            Self::Show { .. } => "show",
        }
    }
}

pub fn load(path: &Path) -> Result<ReplayScript, AppError> {
    let raw = fs::read_to_string(path).map_err(|source| AppError::ScriptRead {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| AppError::ScriptParse {
        path: path.to_path_buf(),
        source,
    })
}

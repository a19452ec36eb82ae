use serde::Deserialize;

use super::{
    conversation::{ConversationKind, ParticipantReadState},
    ids::{ConversationId, MessageId, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Raw persisted-row shape of a message as pushed by the realtime channel.
/// Carries scalar columns only; no sender profile, media or reply object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
    pub created_at_ms: i64,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub edited_at_ms: Option<i64>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at_ms: Option<i64>,
}

impl MessageRow {
    pub fn message_id(&self) -> MessageId {
        MessageId::server(self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowChange {
    Insert { row: MessageRow },
    Update { row: MessageRow },
    Delete { id: String, conversation_id: ConversationId },
}

/// One change on a conversation's message channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RealtimeEvent {
    /// Channel the event was delivered on.
    pub channel: ConversationId,
    pub committed_at_ms: i64,
    #[serde(flatten)]
    pub change: RowChange,
}

impl RealtimeEvent {
    pub fn kind(&self) -> &'static str {
        match self.change {
            RowChange::Insert { .. } => "insert",
            RowChange::Update { .. } => "update",
            RowChange::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    #[serde(default)]
    pub kind: ConversationKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Vec<UserId>,
}

/// Change on the per-user channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserChannelEvent {
    ConversationUpserted {
        conversation: ConversationRow,
    },
    ParticipantChanged {
        conversation_id: ConversationId,
        user_id: UserId,
        #[serde(flatten)]
        read_state: ParticipantReadState,
    },
}

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{
    ids::{ConversationId, MessageId, UserId},
    message::Message,
};

/// Kind of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Exactly two participants.
    #[default]
    Direct,
    /// Any number of participants.
    Group,
}

/// Per-participant read position inside a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantReadState {
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_read_at_ms: Option<i64>,
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
}

impl ParticipantReadState {
    /// Moves the read position forward; never backwards.
    pub fn advance_to(&mut self, message: &Message) {
        let newer = self
            .last_read_at_ms
            .map_or(true, |read_at| message.created_at_ms > read_at);

        if newer {
            self.last_read_at_ms = Some(message.created_at_ms);
            self.last_read_message_id = Some(message.id.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub participants: BTreeSet<UserId>,
    /// Denormalized pointer to the newest message, as reported by the server.
    pub last_message: Option<Message>,
    pub read_states: BTreeMap<UserId, ParticipantReadState>,
}

impl Conversation {
    pub fn new(id: ConversationId, kind: ConversationKind) -> Self {
        Self {
            id,
            kind,
            title: None,
            participants: BTreeSet::new(),
            last_message: None,
            read_states: BTreeMap::new(),
        }
    }

    pub fn read_state(&self, user_id: &UserId) -> Option<&ParticipantReadState> {
        self.read_states.get(user_id)
    }

    pub fn read_state_mut(&mut self, user_id: &UserId) -> &mut ParticipantReadState {
        self.read_states.entry(user_id.clone()).or_default()
    }

    /// Keeps the denormalized last-message pointer at the newest known message.
    pub fn observe_message(&mut self, message: &Message) {
        let newer = self.last_message.as_ref().map_or(true, |current| {
            (message.created_at_ms, &message.id) >= (current.created_at_ms, &current.id)
        });

        if newer {
            self.last_message = Some(message.clone());
        }
    }

    /// Takes the server's view of the conversation. The newer last message
    /// and the viewer's read position, when further ahead locally, survive.
    pub fn refresh_from(&mut self, incoming: Conversation, viewer: &UserId) {
        let local_read = self.read_states.remove(viewer);
        let local_last = self.last_message.take();
        *self = incoming;

        if let Some(last) = local_last {
            self.observe_message(&last);
        }
        if let Some(local) = local_read {
            let server = self.read_state_mut(viewer);
            if local.last_read_at_ms > server.last_read_at_ms {
                *server = local;
            }
        }
    }
}

/// List-level view of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub kind: ConversationKind,
    pub title: String,
    pub preview: String,
    pub last_activity_label: Option<String>,
    pub last_message_at_ms: Option<i64>,
    pub unread_count: u32,
}

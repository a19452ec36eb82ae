//! Translation of raw realtime rows into cache operations.
//!
//! Rows carry scalar columns only, so an inserted message arrives without
//! sender profile or media until a page load enriches it. Deletes never
//! remove an entry; they become a soft-delete update.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    conversation::{Conversation, ConversationKind},
    events::{MessageRow, RealtimeEvent, RowChange, UserChannelEvent},
    ids::{ConversationId, MessageId},
    message::{DeliveryStatus, Message, MessagePatch, DELETED_PLACEHOLDER},
    timeline::MergeOp,
};

const REALTIME_FOREIGN_ROW: &str = "REALTIME_FOREIGN_ROW";

pub fn to_merge_op(event: &RealtimeEvent) -> Option<MergeOp> {
    match &event.change {
        RowChange::Insert { row } => {
            belongs_to_channel(event, &row.conversation_id)
                .then(|| MergeOp::Insert(message_from_row(row, event.committed_at_ms)))
        }
        RowChange::Update { row } => belongs_to_channel(event, &row.conversation_id).then(|| {
            MergeOp::Update(row.message_id(), patch_from_row(row, event.committed_at_ms))
        }),
        RowChange::Delete {
            id,
            conversation_id,
        } => belongs_to_channel(event, conversation_id).then(|| {
            MergeOp::Update(
                MessageId::server(id.clone()),
                MessagePatch::soft_delete(event.committed_at_ms),
            )
        }),
    }
}

pub fn message_from_row(row: &MessageRow, committed_at_ms: i64) -> Message {
    let (edited_at_ms, deleted_at_ms) = row_timestamps(row, committed_at_ms);

    Message {
        id: row.message_id(),
        conversation_id: row.conversation_id.clone(),
        sender_id: row.sender_id.clone(),
        sender: None,
        content: row_content(row),
        media: Vec::new(),
        reply_to: row.reply_to_message_id.as_deref().map(MessageId::parse),
        created_at_ms: row.created_at_ms,
        edited_at_ms,
        deleted_at_ms,
        read_receipts: Vec::new(),
        status: DeliveryStatus::Confirmed,
    }
}

/// Patch carrying every scalar column of the row.
fn patch_from_row(row: &MessageRow, committed_at_ms: i64) -> MessagePatch {
    let (edited_at_ms, deleted_at_ms) = row_timestamps(row, committed_at_ms);

    MessagePatch {
        content: Some(row_content(row)),
        edited_at_ms: Some(edited_at_ms),
        deleted_at_ms: Some(deleted_at_ms),
        media: row.is_deleted.then(Vec::new),
        ..MessagePatch::default()
    }
}

fn row_timestamps(row: &MessageRow, committed_at_ms: i64) -> (Option<i64>, Option<i64>) {
    let edited = row
        .edited_at_ms
        .or_else(|| row.is_edited.then_some(committed_at_ms));
    let deleted = row
        .deleted_at_ms
        .or_else(|| row.is_deleted.then_some(committed_at_ms));
    (edited, deleted)
}

fn row_content(row: &MessageRow) -> Option<String> {
    if row.is_deleted {
        Some(DELETED_PLACEHOLDER.to_owned())
    } else {
        row.content.clone()
    }
}

fn belongs_to_channel(event: &RealtimeEvent, conversation_id: &ConversationId) -> bool {
    let belongs = &event.channel == conversation_id;
    if !belongs {
        tracing::warn!(
            code = REALTIME_FOREIGN_ROW,
            channel = %event.channel,
            conversation_id = %conversation_id,
            event_kind = event.kind(),
            "dropping realtime row of another conversation"
        );
    }
    belongs
}

/// Applies a per-user channel event to the conversation directory.
pub fn apply_user_event(
    directory: &mut BTreeMap<ConversationId, Conversation>,
    event: &UserChannelEvent,
) {
    match event {
        UserChannelEvent::ConversationUpserted { conversation } => {
            let entry = directory
                .entry(conversation.id.clone())
                .or_insert_with(|| Conversation::new(conversation.id.clone(), conversation.kind));
            entry.kind = conversation.kind;
            entry.title = conversation.title.clone();
            entry.participants = conversation.participants.iter().cloned().collect::<BTreeSet<_>>();
        }
        UserChannelEvent::ParticipantChanged {
            conversation_id,
            user_id,
            read_state,
        } => {
            let entry = directory
                .entry(conversation_id.clone())
                .or_insert_with(|| Conversation::new(conversation_id.clone(), ConversationKind::Direct));
            entry.participants.insert(user_id.clone());

            let current = entry.read_state_mut(user_id);
            if read_state.last_read_at_ms >= current.last_read_at_ms {
                *current = read_state.clone();
            }
        }
    }
}

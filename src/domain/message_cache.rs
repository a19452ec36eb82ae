use std::collections::HashMap;

use super::{
    ids::ConversationId,
    message::Message,
    timeline::{ConversationTimeline, MergeOp, MergeOutcome},
};

/// Timelines of every conversation, keyed by conversation id.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    timelines: HashMap<ConversationId, ConversationTimeline>,
}

impl MessageCache {
    pub fn merge(&mut self, conversation_id: &ConversationId, op: MergeOp) -> MergeOutcome {
        if let MergeOp::Insert(message) | MergeOp::Replace(_, message) = &op {
            if &message.conversation_id != conversation_id {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    message_conversation_id = %message.conversation_id,
                    op = op.kind(),
                    "rejecting merge of message into foreign conversation"
                );
                return MergeOutcome::Unchanged;
            }
        }

        self.timelines
            .entry(conversation_id.clone())
            .or_default()
            .merge(op)
    }

    pub fn timeline(&self, conversation_id: &ConversationId) -> Option<&ConversationTimeline> {
        self.timelines.get(conversation_id)
    }

    pub fn timeline_mut(&mut self, conversation_id: &ConversationId) -> &mut ConversationTimeline {
        self.timelines.entry(conversation_id.clone()).or_default()
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.timelines
            .get(conversation_id)
            .map(ConversationTimeline::to_vec)
            .unwrap_or_default()
    }

    /// Purges a conversation's messages.
    pub fn teardown(&mut self, conversation_id: &ConversationId) -> usize {
        self.timelines
            .remove(conversation_id)
            .map(|timeline| timeline.len())
            .unwrap_or(0)
    }
}

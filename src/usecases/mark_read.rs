use crate::domain::{
    conversation::ParticipantReadState,
    ids::{ConversationId, MessageId, UserId},
    message::{Message, MessagePatch, ReadReceipt},
    timeline::MergeOp,
};

use super::{
    contracts::{Clock, MessageApi},
    error::SyncError,
    sync_service::{SessionTicket, SyncNotice, SyncService, SyncState},
};

struct ReadBatch {
    ticket: SessionTicket,
    message_ids: Vec<MessageId>,
    /// `(applied, previous)` per receipted message.
    changes: Vec<(Message, Message)>,
    previous_read_state: Option<ParticipantReadState>,
}

impl<A, C> SyncService<A, C>
where
    A: MessageApi,
    C: Clock,
{
    /// Records the viewer's receipts for `message_ids` and advances the read
    /// position. Returns the unread count after the change.
    ///
    /// Own messages, unconfirmed messages and messages the viewer already has
    /// a receipt for are skipped; when nothing is left no request is made.
    pub async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<u32, SyncError> {
        let viewer = &self.settings.viewer;

        let batch = self.with_state(|state| -> Result<Option<ReadBatch>, SyncError> {
            let ticket = state.ticket(conversation_id)?;
            let now = self.clock.now_ms();

            let targets: Vec<Message> = state
                .cache
                .timeline(conversation_id)
                .map(|timeline| {
                    message_ids
                        .iter()
                        .filter_map(|id| timeline.get(id))
                        .filter(|message| &message.sender_id != viewer)
                        .filter(|message| !message.id.is_temporary())
                        .filter(|message| !message.is_read_by(viewer))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            let Some(newest) = targets
                .iter()
                .max_by(|a, b| (a.created_at_ms, &a.id).cmp(&(b.created_at_ms, &b.id)))
                .cloned()
            else {
                return Ok(None);
            };

            let mut changes = Vec::with_capacity(targets.len());
            for previous in targets {
                let receipt = ReadReceipt {
                    message_id: previous.id.clone(),
                    user_id: viewer.clone(),
                    read_at_ms: now,
                };
                state.merge(
                    conversation_id,
                    MergeOp::Update(previous.id.clone(), MessagePatch::receipts(vec![receipt])),
                );
                let applied = state
                    .cache
                    .timeline(conversation_id)
                    .and_then(|timeline| timeline.get(&previous.id))
                    .cloned()
                    .unwrap_or_else(|| previous.clone());
                changes.push((applied, previous));
            }

            let previous_read_state = state
                .directory
                .get(conversation_id)
                .and_then(|conversation| conversation.read_state(viewer))
                .cloned();
            state
                .conversation_mut(conversation_id)
                .read_state_mut(viewer)
                .advance_to(&newest);
            refresh_unread(state, conversation_id, viewer);
            state.notify(SyncNotice::ConversationsChanged);

            Ok(Some(ReadBatch {
                ticket,
                message_ids: changes.iter().map(|(applied, _)| applied.id.clone()).collect(),
                changes,
                previous_read_state,
            }))
        })?;

        let Some(batch) = batch else {
            return Ok(self.unread_count(conversation_id));
        };

        let result = self
            .run_cancellable(
                &batch.ticket,
                self.api.mark_read(conversation_id, &batch.message_ids),
            )
            .await;

        self.with_state(|state| {
            if !state.is_current(&batch.ticket) {
                return Err(result.err().unwrap_or(SyncError::Cancelled));
            }

            match result {
                Ok(()) => {
                    tracing::debug!(
                        conversation_id = %conversation_id,
                        count = batch.message_ids.len(),
                        "messages marked as read"
                    );
                    Ok(state.unread_for(conversation_id, viewer))
                }
                Err(error) => {
                    for (applied, previous) in batch.changes {
                        state
                            .cache
                            .timeline_mut(conversation_id)
                            .rollback(&applied, Some(previous));
                    }

                    let conversation = state.conversation_mut(conversation_id);
                    match batch.previous_read_state {
                        Some(read_state) => {
                            conversation.read_states.insert(viewer.clone(), read_state);
                        }
                        None => {
                            conversation.read_states.remove(viewer);
                        }
                    }
                    refresh_unread(state, conversation_id, viewer);
                    state.timeline_changed(conversation_id);
                    state.notify(SyncNotice::OperationFailed {
                        conversation_id: conversation_id.clone(),
                        code: error.code(),
                    });

                    tracing::warn!(
                        code = error.code(),
                        conversation_id = %conversation_id,
                        error = %error,
                        "failed to mark messages as read; receipts withdrawn"
                    );
                    Err(error)
                }
            }
        })
    }
}

fn refresh_unread(
    state: &mut SyncState,
    conversation_id: &ConversationId,
    viewer: &UserId,
) {
    let unread = state.unread_for(conversation_id, viewer);
    state
        .conversation_mut(conversation_id)
        .read_state_mut(viewer)
        .unread_count = unread;
}

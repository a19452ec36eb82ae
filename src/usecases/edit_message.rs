//! Optimistic edit and soft delete of the viewer's own messages.

use crate::domain::{
    ids::{ConversationId, MessageId},
    message::{Message, MessagePatch},
    timeline::MergeOp,
};

use super::{
    contracts::{Clock, MessageApi},
    error::{SyncError, ValidationError},
    sync_service::{SessionTicket, SyncNotice, SyncService, SyncState},
};

/// Optimistic change already applied to the cache, with what it replaced.
struct AppliedChange {
    ticket: SessionTicket,
    previous: Message,
    applied: Message,
}

impl<A, C> SyncService<A, C>
where
    A: MessageApi,
    C: Clock,
{
    /// Replaces the content of one of the viewer's messages.
    ///
    /// # Errors
    /// Validation failures (empty text, not the author, still pending, already
    /// deleted, edit window passed) are returned before any cache mutation.
    pub async fn edit_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        text: &str,
    ) -> Result<Message, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let change = self.with_state(|state| {
            let now = self.clock.now_ms();
            self.validate_own_change(state, conversation_id, message_id, now, true)?;
            apply_optimistic(
                state,
                conversation_id,
                message_id,
                &MessagePatch::edit(text, now),
            )
        })?;

        let result = self
            .run_cancellable(
                &change.ticket,
                self.api.edit_message(conversation_id, message_id, text),
            )
            .await;

        self.with_state(|state| match result {
            Ok(server) => {
                if !state.is_current(&change.ticket) {
                    return Err(SyncError::Cancelled);
                }
                state.merge(conversation_id, MergeOp::Insert(server));
                current_or(state, conversation_id, change.applied)
            }
            Err(error) => Err(roll_back(state, change, error, "edit")),
        })
    }

    /// Soft-deletes one of the viewer's messages: the entry stays in place
    /// with placeholder content and no media.
    pub async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<Message, SyncError> {
        let change = self.with_state(|state| {
            let now = self.clock.now_ms();
            self.validate_own_change(state, conversation_id, message_id, now, false)?;
            apply_optimistic(
                state,
                conversation_id,
                message_id,
                &MessagePatch::soft_delete(now),
            )
        })?;

        let result = self
            .run_cancellable(
                &change.ticket,
                self.api.delete_message(conversation_id, message_id),
            )
            .await;

        self.with_state(|state| match result {
            Ok(()) => {
                if !state.is_current(&change.ticket) {
                    return Err(SyncError::Cancelled);
                }
                current_or(state, conversation_id, change.applied)
            }
            Err(error) => Err(roll_back(state, change, error, "delete")),
        })
    }

    fn validate_own_change(
        &self,
        state: &SyncState,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        now_ms: i64,
        enforce_window: bool,
    ) -> Result<(), SyncError> {
        let existing = state
            .cache
            .timeline(conversation_id)
            .and_then(|timeline| timeline.get(message_id))
            .ok_or_else(|| SyncError::MessageNotFound(message_id.clone()))?;

        if existing.sender_id != self.settings.viewer {
            return Err(ValidationError::NotAuthor.into());
        }
        if existing.is_pending() {
            return Err(ValidationError::MessagePending.into());
        }
        if existing.is_deleted() {
            return Err(ValidationError::AlreadyDeleted.into());
        }
        if enforce_window && now_ms - existing.created_at_ms > self.settings.edit_window_ms {
            return Err(ValidationError::EditWindowExceeded {
                window_ms: self.settings.edit_window_ms,
            }
            .into());
        }

        Ok(())
    }
}

fn apply_optimistic(
    state: &mut SyncState,
    conversation_id: &ConversationId,
    message_id: &MessageId,
    patch: &MessagePatch,
) -> Result<AppliedChange, SyncError> {
    let ticket = state.ticket(conversation_id)?;
    let previous = state
        .cache
        .timeline(conversation_id)
        .and_then(|timeline| timeline.get(message_id))
        .cloned()
        .ok_or_else(|| SyncError::MessageNotFound(message_id.clone()))?;

    state.merge(conversation_id, MergeOp::Update(message_id.clone(), patch.clone()));

    let applied = state
        .cache
        .timeline(conversation_id)
        .and_then(|timeline| timeline.get(message_id))
        .cloned()
        .unwrap_or_else(|| previous.clone());

    Ok(AppliedChange {
        ticket,
        previous,
        applied,
    })
}

fn current_or(
    state: &SyncState,
    conversation_id: &ConversationId,
    fallback: Message,
) -> Result<Message, SyncError> {
    Ok(state
        .cache
        .timeline(conversation_id)
        .and_then(|timeline| timeline.get(&fallback.id))
        .cloned()
        .unwrap_or(fallback))
}

/// Restores the pre-change entry unless a newer write superseded the
/// optimistic one meanwhile.
fn roll_back(
    state: &mut SyncState,
    change: AppliedChange,
    error: SyncError,
    operation: &'static str,
) -> SyncError {
    if !state.is_current(&change.ticket) {
        return error;
    }

    let conversation_id = change.ticket.conversation_id.clone();
    let message_id = change.applied.id.clone();
    let restored = state
        .cache
        .timeline_mut(&conversation_id)
        .rollback(&change.applied, Some(change.previous));

    if restored {
        state.timeline_changed(&conversation_id);
    }
    state.notify(SyncNotice::OperationFailed {
        conversation_id: conversation_id.clone(),
        code: error.code(),
    });

    tracing::warn!(
        code = error.code(),
        conversation_id = %conversation_id,
        message_id = %message_id,
        operation,
        restored,
        error = %error,
        "optimistic change failed"
    );
    error
}

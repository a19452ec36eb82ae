//! Use case for sending a message with optimistic display.
//!
//! The message is shown immediately under a temporary id, confirmed in place
//! once the server assigns the real id, or withdrawn if the request fails.

use crate::domain::{
    ids::{ConversationId, MessageId},
    message::{DeliveryStatus, MediaRef, Message},
    timeline::MergeOp,
};

use super::{
    contracts::{Clock, MessageApi, NewMessage},
    error::{SyncError, ValidationError},
    sync_service::{SyncNotice, SyncService, SyncState},
};

/// Command to send a message to a specific conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageCommand {
    pub conversation_id: ConversationId,
    pub text: String,
    pub media: Vec<MediaRef>,
    pub reply_to: Option<MessageId>,
}

impl SendMessageCommand {
    pub fn text(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            text: text.into(),
            media: Vec::new(),
            reply_to: None,
        }
    }
}

/// Lifecycle of one outgoing message, keyed by its temporary id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingState {
    Composing,
    Pending,
    Confirmed,
    Failed,
}

impl<A, C> SyncService<A, C>
where
    A: MessageApi,
    C: Clock,
{
    /// Sends a message to the specified conversation.
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyMessage` without touching the cache when
    /// the trimmed text is empty and there is no media. On a network failure
    /// the temporary entry is removed and the failure is returned.
    pub async fn send_message(&self, command: SendMessageCommand) -> Result<Message, SyncError> {
        let text = command.text.trim();
        if text.is_empty() && command.media.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let content = (!text.is_empty()).then(|| text.to_owned());
        let conversation_id = command.conversation_id;

        let (ticket, temp) = self.with_state(|state| {
            let ticket = state.ticket(&conversation_id)?;
            let temp_id = state.allocate_temp_id();
            advance_outgoing(state, &temp_id, &conversation_id, OutgoingState::Composing);

            let temp = Message {
                id: temp_id.clone(),
                conversation_id: conversation_id.clone(),
                sender_id: self.settings.viewer.clone(),
                sender: None,
                content: content.clone(),
                media: command.media.clone(),
                reply_to: command.reply_to.clone(),
                created_at_ms: self.clock.now_ms(),
                edited_at_ms: None,
                deleted_at_ms: None,
                read_receipts: Vec::new(),
                status: DeliveryStatus::Pending,
            };
            state.merge(&conversation_id, MergeOp::Insert(temp.clone()));
            advance_outgoing(state, &temp_id, &conversation_id, OutgoingState::Pending);

            Ok::<_, SyncError>((ticket, temp))
        })?;

        let request = NewMessage {
            conversation_id: conversation_id.clone(),
            content,
            media: command.media,
            reply_to: command.reply_to,
        };
        let result = self
            .run_cancellable(&ticket, self.api.create_message(&request))
            .await;

        self.with_state(|state| {
            if !state.is_current(&ticket) {
                state.outbox.remove(&temp.id);
                return Err(SyncError::Cancelled);
            }

            match result {
                Ok(server) => {
                    let server_id = server.id.clone();
                    state.merge(&conversation_id, MergeOp::Replace(temp.id.clone(), server.clone()));
                    advance_outgoing(state, &temp.id, &conversation_id, OutgoingState::Confirmed);

                    tracing::debug!(
                        conversation_id = %conversation_id,
                        temp_id = %temp.id,
                        message_id = %server_id,
                        "outgoing message confirmed"
                    );

                    Ok(state
                        .cache
                        .timeline(&conversation_id)
                        .and_then(|timeline| timeline.get(&server_id))
                        .cloned()
                        .unwrap_or(server))
                }
                Err(error) => {
                    state.merge(&conversation_id, MergeOp::Remove(temp.id.clone()));
                    advance_outgoing(state, &temp.id, &conversation_id, OutgoingState::Failed);
                    state.notify(SyncNotice::OperationFailed {
                        conversation_id: conversation_id.clone(),
                        code: error.code(),
                    });

                    tracing::warn!(
                        code = error.code(),
                        conversation_id = %conversation_id,
                        temp_id = %temp.id,
                        error = %error,
                        "outgoing message failed; optimistic entry withdrawn"
                    );
                    Err(error)
                }
            }
        })
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn outgoing_state(&self, temp_id: &MessageId) -> Option<OutgoingState> {
        self.with_state(|state| state.outbox.get(temp_id).map(|(_, outgoing)| *outgoing))
    }
}

fn advance_outgoing(
    state: &mut SyncState,
    temp_id: &MessageId,
    conversation_id: &ConversationId,
    next: OutgoingState,
) {
    let previous = state
        .outbox
        .insert(temp_id.clone(), (conversation_id.clone(), next))
        .map(|(_, previous)| previous);

    tracing::trace!(temp_id = %temp_id, from = ?previous, to = ?next, "outgoing message state");
}

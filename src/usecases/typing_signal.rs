//! Typing indicators: the viewer's outbound signal and other participants'
//! inbound state.

use crate::domain::{
    ids::{ConversationId, UserId},
    typing::TypingEvent,
};

use super::{
    contracts::{Clock, MessageApi},
    error::SyncError,
    sync_service::{SyncNotice, SyncService},
};

impl<A, C> SyncService<A, C>
where
    A: MessageApi,
    C: Clock,
{
    /// Registers a local keystroke. The typing signal is sent only when the
    /// viewer goes from idle to typing; keystrokes inside the debounce window
    /// just extend it. Returns whether a signal was delivered; a failed
    /// delivery is logged and otherwise ignored.
    pub async fn typing_keystroke(&self, conversation_id: &ConversationId) -> Result<bool, SyncError> {
        let ticket = self.with_state(|state| {
            let ticket = state.ticket(conversation_id)?;
            let started = state
                .sessions
                .get_mut(conversation_id)
                .map(|session| {
                    session.typing.apply(
                        &self.settings.viewer,
                        TypingEvent::Keystroke,
                        self.clock.now_ms(),
                        self.settings.typing_ttl_ms,
                    )
                })
                .unwrap_or(false);
            Ok::<_, SyncError>(started.then_some(ticket))
        })?;

        let Some(ticket) = ticket else {
            return Ok(false);
        };

        match self
            .run_cancellable(&ticket, self.api.send_typing(conversation_id))
            .await
        {
            Ok(()) => Ok(true),
            Err(error) => {
                tracing::debug!(
                    code = error.code(),
                    conversation_id = %conversation_id,
                    error = %error,
                    "typing signal was not delivered"
                );
                Ok(false)
            }
        }
    }

    /// The viewer stopped typing (message sent or input cleared).
    pub fn typing_stopped(&self, conversation_id: &ConversationId) {
        let now = self.clock.now_ms();
        self.with_state(|state| {
            if let Some(session) = state.sessions.get_mut(conversation_id) {
                session
                    .typing
                    .apply(&self.settings.viewer, TypingEvent::Stop, now, 0);
            }
        });
    }

    /// Typing event received for another participant.
    pub fn remote_typing(&self, conversation_id: &ConversationId, user: &UserId, event: TypingEvent) {
        let now = self.clock.now_ms();
        self.with_state(|state| {
            let Some(session) = state.sessions.get_mut(conversation_id) else {
                return;
            };
            let before = session.typing.active_users(now);
            session
                .typing
                .apply(user, event, now, self.settings.typing_ttl_ms);
            if session.typing.active_users(now) != before {
                state.notify(SyncNotice::TimelineChanged(conversation_id.clone()));
            }
        });
    }

    /// Other participants typing right now. Lapsed entries are dropped.
    pub fn typing_users(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        let now = self.clock.now_ms();
        self.with_state(|state| {
            let Some(session) = state.sessions.get_mut(conversation_id) else {
                return Vec::new();
            };
            session.typing.prune(now);
            session
                .typing
                .active_users(now)
                .into_iter()
                .filter(|user| user != &self.settings.viewer)
                .collect()
        })
    }
}

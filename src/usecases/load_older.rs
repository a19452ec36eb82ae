//! Backward pagination through a conversation's history.

use tokio::sync::watch;

use crate::domain::{ids::ConversationId, message::Message, timeline::MergeOp};

use super::{
    contracts::{Clock, MessageApi, PageCursor},
    error::SyncError,
    sync_service::{SessionTicket, SyncService},
};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

const PAGE_DROPPED_FOREIGN: &str = "SYNC_PAGE_FOREIGN_MESSAGE";

pub fn normalized_page_size(limit: usize) -> usize {
    match limit {
        0 => DEFAULT_PAGE_SIZE,
        value if value > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
        value => value,
    }
}

/// Result of one backward page load, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<PageCursor>,
}

type PageSlot = watch::Receiver<Option<Result<Page, SyncError>>>;

enum Role {
    Leader {
        ticket: SessionTicket,
        cursor: Option<PageCursor>,
        publish: watch::Sender<Option<Result<Page, SyncError>>>,
    },
    Follower(PageSlot),
    Exhausted(Option<PageCursor>),
}

impl<A, C> SyncService<A, C>
where
    A: MessageApi,
    C: Clock,
{
    /// Loads the page just before the oldest cached message, or the latest
    /// page when nothing is cached yet.
    ///
    /// Calls issued while a load for the same conversation is in flight share
    /// its result instead of issuing a second request. Once the history is
    /// exhausted no further request is made.
    pub async fn load_older(&self, conversation_id: &ConversationId) -> Result<Page, SyncError> {
        let role = self.with_state(|state| -> Result<Role, SyncError> {
            let ticket = state.ticket(conversation_id)?;
            let session = state
                .sessions
                .get_mut(conversation_id)
                .ok_or_else(|| SyncError::ConversationNotOpen(conversation_id.clone()))?;

            if let Some(slot) = &session.pagination.in_flight {
                if slot.has_changed().is_ok() {
                    return Ok(Role::Follower(slot.clone()));
                }
            }

            if session.pagination.exhausted {
                return Ok(Role::Exhausted(session.pagination.next_cursor.clone()));
            }

            let cursor = state
                .cache
                .timeline(conversation_id)
                .and_then(|timeline| timeline.earliest_confirmed())
                .map(PageCursor::of);
            let (publish, slot) = watch::channel(None);
            session.pagination.in_flight = Some(slot);

            Ok(Role::Leader {
                ticket,
                cursor,
                publish,
            })
        })?;

        match role {
            Role::Exhausted(next_cursor) => Ok(Page {
                messages: Vec::new(),
                has_more: false,
                next_cursor,
            }),
            Role::Follower(slot) => await_shared(slot).await,
            Role::Leader {
                ticket,
                cursor,
                publish,
            } => {
                let result = self.fetch_page(&ticket, cursor).await;
                publish.send_replace(Some(result.clone()));
                result
            }
        }
    }

    async fn fetch_page(
        &self,
        ticket: &SessionTicket,
        cursor: Option<PageCursor>,
    ) -> Result<Page, SyncError> {
        let conversation_id = &ticket.conversation_id;
        let limit = self.settings.page_size;

        tracing::debug!(
            conversation_id = %conversation_id,
            before = ?cursor.as_ref().map(|cursor| cursor.before_id.to_string()),
            limit,
            "loading older messages"
        );

        let fetched = self
            .run_cancellable(
                ticket,
                self.api.fetch_messages(conversation_id, cursor.as_ref(), limit),
            )
            .await;

        self.with_state(|state| {
            if !state.is_current(ticket) {
                return Err(SyncError::Cancelled);
            }
            if let Some(session) = state.sessions.get_mut(conversation_id) {
                session.pagination.in_flight = None;
            }

            let fetched = match fetched {
                Ok(fetched) => fetched,
                Err(error) => {
                    tracing::warn!(
                        code = error.code(),
                        conversation_id = %conversation_id,
                        error = %error,
                        "failed to load older messages"
                    );
                    return Err(error);
                }
            };

            let batch_len = fetched.messages.len();
            let mut messages: Vec<Message> = fetched
                .messages
                .into_iter()
                .filter(|message| {
                    let belongs = &message.conversation_id == conversation_id;
                    if !belongs {
                        tracing::warn!(
                            code = PAGE_DROPPED_FOREIGN,
                            conversation_id = %conversation_id,
                            message_id = %message.id,
                            "page contained a message of another conversation"
                        );
                    }
                    belongs
                })
                .filter(|message| cursor.as_ref().map_or(true, |cursor| cursor.admits(message)))
                .collect();
            messages.sort_by(|a, b| (a.created_at_ms, &a.id).cmp(&(b.created_at_ms, &b.id)));

            let mut changed = false;
            for message in &messages {
                changed |= state
                    .cache
                    .merge(conversation_id, MergeOp::Insert(message.clone()))
                    .changed();
            }

            let has_more = fetched.has_more && batch_len >= limit;
            let next_cursor = state
                .cache
                .timeline(conversation_id)
                .and_then(|timeline| timeline.earliest_confirmed())
                .map(PageCursor::of)
                .or(fetched.next_cursor);

            if let Some(session) = state.sessions.get_mut(conversation_id) {
                session.pagination.exhausted = !has_more;
                session.pagination.next_cursor = next_cursor.clone();
            }

            if changed {
                state.timeline_changed(conversation_id);
            }

            tracing::debug!(
                conversation_id = %conversation_id,
                received = batch_len,
                kept = messages.len(),
                has_more,
                "older messages merged"
            );

            Ok(Page {
                messages,
                has_more,
                next_cursor,
            })
        })
    }
}

async fn await_shared(mut slot: PageSlot) -> Result<Page, SyncError> {
    loop {
        let ready = slot.borrow_and_update().clone();
        if let Some(result) = ready {
            return result;
        }
        if slot.changed().await.is_err() {
            let last = slot.borrow().clone();
            return last.unwrap_or(Err(SyncError::Cancelled));
        }
    }
}

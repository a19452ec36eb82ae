//! Recovery after a realtime subscription drops and comes back.
//!
//! While disconnected the cache is kept as is. On reconnect the conversation
//! list is fetched again, then each open conversation pages backward from its
//! newest message until the fetched history meets what is cached, which fills
//! any gap the dropped subscription left.

use crate::domain::{
    events::ConnectivityStatus, ids::ConversationId, message::Message, timeline::MergeOp,
};

use super::{
    contracts::{Clock, MessageApi, PageCursor},
    error::SyncError,
    sync_service::{SyncNotice, SyncService},
};

const REALTIME_DISCONNECTED: &str = "SYNC_REALTIME_DISCONNECTED";
const RECONNECT_LIST_REFRESH_FAILED: &str = "SYNC_RECONNECT_LIST_REFRESH_FAILED";
const RESYNC_PAGE_LIMIT_REACHED: &str = "SYNC_RESYNC_PAGE_LIMIT_REACHED";

/// Upper bound on pages fetched while closing one gap.
const MAX_RESYNC_PAGES: usize = 20;

/// Outcome of merging one resync page.
struct ResyncPage {
    changed: usize,
    reached_cache: bool,
    next_cursor: PageCursor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub conversations: usize,
    pub refreshed: Vec<ConversationId>,
    pub failed: Vec<(ConversationId, &'static str)>,
}

impl<A, C> SyncService<A, C>
where
    A: MessageApi,
    C: Clock,
{
    pub fn set_connectivity(&self, conversation_id: &ConversationId, status: ConnectivityStatus) {
        self.with_state(|state| {
            let Some(session) = state.sessions.get_mut(conversation_id) else {
                return;
            };
            if session.realtime == status {
                return;
            }
            session.realtime = status;

            if status == ConnectivityStatus::Disconnected {
                tracing::warn!(
                    code = REALTIME_DISCONNECTED,
                    conversation_id = %conversation_id,
                    "realtime subscription dropped; keeping cached messages"
                );
            } else {
                tracing::info!(
                    conversation_id = %conversation_id,
                    status = ?status,
                    "realtime connectivity changed"
                );
            }

            state.notify(SyncNotice::ConnectivityChanged {
                conversation_id: conversation_id.clone(),
                status,
            });
        });
    }

    pub fn connectivity(&self, conversation_id: &ConversationId) -> Option<ConnectivityStatus> {
        self.with_state(|state| {
            state
                .sessions
                .get(conversation_id)
                .map(|session| session.realtime)
        })
    }

    /// Recovery for a conversation whose transport came back: the
    /// conversation list is refreshed first, then the conversation itself.
    /// A failed list refresh is logged and does not stop the conversation
    /// resync.
    pub async fn resync_after_reconnect(&self, conversation_id: &ConversationId) -> Result<usize, SyncError> {
        self.set_connectivity(conversation_id, ConnectivityStatus::Connected);

        if let Err(error) = self.refresh_conversations().await {
            tracing::warn!(
                code = RECONNECT_LIST_REFRESH_FAILED,
                conversation_id = %conversation_id,
                error = %error,
                "conversation list refresh after reconnect failed"
            );
        }

        self.resync_conversation(conversation_id).await
    }

    /// Re-fetches the newest messages of one open conversation and merges
    /// them, paging backward until a page reaches a message that was already
    /// cached or the history ends. Returns how many cache entries changed.
    pub async fn resync_conversation(&self, conversation_id: &ConversationId) -> Result<usize, SyncError> {
        let (ticket, cached) = self.with_state(|state| {
            let ticket = state.ticket(conversation_id)?;
            let cached = state
                .cache
                .timeline(conversation_id)
                .is_some_and(|timeline| !timeline.is_empty());
            Ok::<_, SyncError>((ticket, cached))
        })?;

        if !cached {
            return self
                .load_older(conversation_id)
                .await
                .map(|page| page.messages.len());
        }

        let mut cursor: Option<PageCursor> = None;
        let mut changed = 0;
        let mut pages = 0;
        loop {
            let fetched = self
                .run_cancellable(
                    &ticket,
                    self.api
                        .fetch_messages(conversation_id, cursor.as_ref(), self.settings.page_size),
                )
                .await?;
            let has_more = fetched.has_more;
            pages += 1;

            let page = self.with_state(|state| -> Result<Option<ResyncPage>, SyncError> {
                if !state.is_current(&ticket) {
                    return Err(SyncError::Cancelled);
                }

                let mut messages: Vec<Message> = fetched
                    .messages
                    .into_iter()
                    .filter(|message| &message.conversation_id == conversation_id)
                    .filter(|message| cursor.as_ref().map_or(true, |cursor| cursor.admits(message)))
                    .collect();
                messages.sort_by(|a, b| (a.created_at_ms, &a.id).cmp(&(b.created_at_ms, &b.id)));
                let Some(earliest) = messages.first() else {
                    return Ok(None);
                };

                let next_cursor = PageCursor::of(earliest);
                let reached_cache = state.cache.timeline(conversation_id).is_some_and(|timeline| {
                    timeline.contains(&earliest.id)
                        || timeline.earliest_confirmed().is_some_and(|oldest| {
                            (earliest.created_at_ms, &earliest.id) <= (oldest.created_at_ms, &oldest.id)
                        })
                });

                let mut page_changed = 0;
                for message in messages {
                    if state
                        .cache
                        .merge(conversation_id, MergeOp::Insert(message))
                        .changed()
                    {
                        page_changed += 1;
                    }
                }
                if page_changed > 0 {
                    state.timeline_changed(conversation_id);
                }

                Ok(Some(ResyncPage {
                    changed: page_changed,
                    reached_cache,
                    next_cursor,
                }))
            })?;

            let Some(page) = page else {
                break;
            };
            changed += page.changed;
            if page.reached_cache || !has_more {
                break;
            }
            if pages >= MAX_RESYNC_PAGES {
                tracing::warn!(
                    code = RESYNC_PAGE_LIMIT_REACHED,
                    conversation_id = %conversation_id,
                    pages,
                    "resync stopped before reaching cached messages"
                );
                break;
            }
            cursor = Some(page.next_cursor);
        }

        tracing::info!(
            conversation_id = %conversation_id,
            changed,
            pages,
            "conversation resynchronized"
        );
        Ok(changed)
    }

    /// Refreshes the conversation list and every open conversation.
    pub async fn resync(&self) -> Result<ResyncReport, SyncError> {
        let conversations = self.refresh_conversations().await?.len();
        let open: Vec<ConversationId> =
            self.with_state(|state| state.sessions.keys().cloned().collect());

        let mut report = ResyncReport {
            conversations,
            ..ResyncReport::default()
        };
        for conversation_id in open {
            match self.resync_conversation(&conversation_id).await {
                Ok(_) => report.refreshed.push(conversation_id),
                Err(SyncError::ConversationNotOpen(_) | SyncError::Cancelled) => {}
                Err(error) => report.failed.push((conversation_id, error.code())),
            }
        }
        report.refreshed.sort();

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            conversation::{Conversation, ConversationKind},
            ids::MessageId,
        },
        test_support::{conversation_id, history, message, service, ApiCall, FakeApi},
        usecases::contracts::ApiError,
    };

    #[tokio::test]
    async fn reconnect_fills_gap_from_latest_page() {
        let api = FakeApi::default();
        api.push_page(history(1, 5), false);
        let service = service(api.clone());
        service.open_conversation(&conversation_id());
        service.load_older(&conversation_id()).await.expect("initial page");

        service.set_connectivity(&conversation_id(), ConnectivityStatus::Disconnected);
        assert_eq!(service.messages(&conversation_id()).len(), 5);

        api.push_page(history(4, 8), false);
        service.set_connectivity(&conversation_id(), ConnectivityStatus::Connected);
        let changed = service
            .resync_conversation(&conversation_id())
            .await
            .expect("resync succeeds");

        assert_eq!(changed, 3);
        let ids: Vec<MessageId> = service
            .messages(&conversation_id())
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids.len(), 8);
        assert_eq!(ids.last(), Some(&MessageId::server("m008")));
    }

    #[tokio::test]
    async fn resync_of_empty_conversation_loads_first_page() {
        let api = FakeApi::default();
        api.push_page(history(1, 3), false);
        let service = service(api.clone());
        service.open_conversation(&conversation_id());

        let changed = service
            .resync_conversation(&conversation_id())
            .await
            .expect("resync succeeds");

        assert_eq!(changed, 3);
    }

    #[tokio::test]
    async fn full_resync_reports_each_open_conversation() {
        let api = FakeApi::default().with_conversations(vec![Conversation::new(
            conversation_id(),
            ConversationKind::Direct,
        )]);
        let service = service(api.clone());
        service.open_conversation(&conversation_id());
        service.merge(&conversation_id(), MergeOp::Insert(message("m1", "alice", "hi", 1_000)));
        api.push_page_error(ApiError::Timeout);

        let report = service.resync().await.expect("list refresh succeeds");

        assert_eq!(report.conversations, 1);
        assert!(report.refreshed.is_empty());
        assert_eq!(report.failed, vec![(conversation_id(), "API_TIMEOUT")]);
        assert_eq!(service.messages(&conversation_id()).len(), 1);
    }

    #[tokio::test]
    async fn reconnect_pages_back_until_the_gap_is_closed() {
        let api = FakeApi::default();
        api.push_page(history(1, 50), true);
        let service = service(api.clone());
        service.open_conversation(&conversation_id());
        service.load_older(&conversation_id()).await.expect("initial page");

        api.push_page(history(111, 160), true);
        api.push_page(history(61, 110), true);
        api.push_page(history(11, 60), true);
        let changed = service
            .resync_conversation(&conversation_id())
            .await
            .expect("resync succeeds");

        assert_eq!(changed, 110);
        let ids: Vec<MessageId> = service
            .messages(&conversation_id())
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids.len(), 160);
        assert_eq!(ids.first(), Some(&MessageId::server("m001")));
        assert_eq!(ids.last(), Some(&MessageId::server("m160")));

        let cursors: Vec<Option<MessageId>> = api
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::FetchMessages { before, .. } => Some(before.map(|cursor| cursor.before_id)),
                _ => None,
            })
            .collect();
        assert_eq!(
            cursors,
            vec![
                None,
                None,
                Some(MessageId::server("m111")),
                Some(MessageId::server("m061")),
            ]
        );
    }

    #[tokio::test]
    async fn resync_stops_when_history_ends() {
        let api = FakeApi::default();
        let service = service(api.clone());
        service.open_conversation(&conversation_id());
        service.merge(&conversation_id(), MergeOp::Insert(message("m900", "alice", "hi", 900_000)));

        api.push_page(history(901, 905), false);
        let changed = service
            .resync_conversation(&conversation_id())
            .await
            .expect("resync succeeds");

        assert_eq!(changed, 5);
        assert_eq!(api.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn reconnect_refreshes_the_conversation_list_too() {
        let api = FakeApi::default().with_conversations(vec![Conversation::new(
            conversation_id(),
            ConversationKind::Direct,
        )]);
        api.push_page(history(1, 3), false);
        let service = service(api.clone());
        service.open_conversation(&conversation_id());
        service.set_connectivity(&conversation_id(), ConnectivityStatus::Disconnected);

        let changed = service
            .resync_after_reconnect(&conversation_id())
            .await
            .expect("resync succeeds");

        assert_eq!(changed, 3);
        assert_eq!(api.calls().first(), Some(&ApiCall::ListConversations));
        assert_eq!(service.conversation_summaries().len(), 1);
        assert_eq!(
            service.connectivity(&conversation_id()),
            Some(ConnectivityStatus::Connected)
        );
    }

    #[tokio::test]
    async fn failed_list_refresh_does_not_block_conversation_resync() {
        let api = FakeApi::default();
        api.fail("list_conversations", ApiError::Unavailable);
        api.push_page(history(1, 3), false);
        let service = service(api.clone());
        service.open_conversation(&conversation_id());

        let changed = service
            .resync_after_reconnect(&conversation_id())
            .await
            .expect("conversation resync succeeds");

        assert_eq!(changed, 3);
    }

    #[test]
    fn connectivity_changes_are_tracked_per_conversation() {
        let service = service(FakeApi::default());
        service.open_conversation(&conversation_id());
        let notices = service.subscribe();

        service.set_connectivity(&conversation_id(), ConnectivityStatus::Connected);
        service.set_connectivity(&conversation_id(), ConnectivityStatus::Connected);

        assert_eq!(
            service.connectivity(&conversation_id()),
            Some(ConnectivityStatus::Connected)
        );
        assert_eq!(notices.try_iter().count(), 1);
    }
}

use crate::domain::{aggregate, conversation::ConversationSummary};

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
    /// Pulls the conversation list from the server into the directory and
    /// returns the refreshed summaries.
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError> {
        let conversations = self.api.list_conversations().await.map_err(|error| {
            tracing::warn!(
                code = error.code(),
                error = %error,
                "failed to list conversations"
            );
            SyncError::from(error)
        })?;

        let count = conversations.len();
        self.with_state(|state| {
            for incoming in conversations {
                match state.directory.get_mut(&incoming.id) {
                    Some(existing) => existing.refresh_from(incoming, &self.settings.viewer),
                    None => {
                        state.directory.insert(incoming.id.clone(), incoming);
                    }
                }
            }
            state.notify(SyncNotice::ConversationsChanged);
        });

        tracing::debug!(count, "conversation list refreshed");
        Ok(self.conversation_summaries())
    }

    /// Summaries of every known conversation, most recent activity first.
    ///
    /// A conversation with cached messages is summarized from them; one that
    /// was never opened falls back to the server's denormalized state.
    pub fn conversation_summaries(&self) -> Vec<ConversationSummary> {
        let now = self.clock.now_ms();

        let mut summaries: Vec<ConversationSummary> = self.with_state(|state| {
            state
                .directory
                .values()
                .map(|conversation| {
                    aggregate::summarize(
                        conversation,
                        state.cache.timeline(&conversation.id),
                        &self.settings.viewer,
                        now,
                        self.settings.preview_width,
                    )
                })
                .collect()
        });

        summaries.sort_by(|a, b| {
            b.last_message_at_ms
                .cmp(&a.last_message_at_ms)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            aggregate::EMPTY_PREVIEW,
            conversation::{Conversation, ConversationKind},
            ids::{ConversationId, UserId},
            timeline::MergeOp,
        },
        test_support::{conversation_id, message, service, viewer, FakeApi, NOW},
        usecases::contracts::ApiError,
    };

    fn direct(id: &str, other: &str) -> Conversation {
        let mut conversation = Conversation::new(ConversationId::new(id), ConversationKind::Direct);
        conversation.participants.insert(viewer());
        conversation.participants.insert(UserId::new(other));
        conversation
    }

    #[tokio::test]
    async fn summaries_are_sorted_by_latest_activity() {
        let mut quiet = direct("c2", "bob");
        let mut old = message("b1", "bob", "old news", NOW - 3_600_000);
        old.conversation_id = ConversationId::new("c2");
        quiet.last_message = Some(old);
        let mut busy = direct("c1", "alice");
        busy.last_message = Some(message("a1", "alice", "fresh", NOW - 60_000));
        let empty = direct("c3", "carol");
        let api = FakeApi::default().with_conversations(vec![quiet, busy, empty]);
        let service = service(api);

        let summaries = service
            .refresh_conversations()
            .await
            .expect("list succeeds");

        let order: Vec<&str> = summaries
            .iter()
            .map(|summary| summary.conversation_id.as_str())
            .collect();
        assert_eq!(order, vec!["c1", "c2", "c3"]);
        assert_eq!(summaries[0].last_activity_label.as_deref(), Some("1m"));
        assert_eq!(summaries[0].title, "alice");
        assert_eq!(summaries[2].preview, EMPTY_PREVIEW);
    }

    #[tokio::test]
    async fn cached_messages_take_precedence_over_listing() {
        let mut listed = direct("c1", "alice");
        listed.last_message = Some(message("a1", "alice", "listed", NOW - 60_000));
        listed.read_state_mut(&viewer()).unread_count = 7;
        let service = service(FakeApi::default().with_conversations(vec![listed]));
        service
            .refresh_conversations()
            .await
            .expect("list succeeds");

        service.merge(
            &conversation_id(),
            MergeOp::Insert(message("a2", "alice", "cached", NOW)),
        );
        let summaries = service.conversation_summaries();

        assert_eq!(summaries[0].preview, "cached");
        assert_eq!(summaries[0].unread_count, 1);
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let api = FakeApi::default();
        api.fail("list_conversations", ApiError::Unauthorized);
        let service = service(api);

        let result = service.refresh_conversations().await;

        assert_eq!(result, Err(SyncError::Network(ApiError::Unauthorized)));
        assert!(service.conversation_summaries().is_empty());
    }
}

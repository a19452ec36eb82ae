//! In-memory message backend used by `chatsync replay`.
//!
//! Serves pages backwards from its own store, assigns server ids to created
//! messages and records edits, deletes and receipts, so a replay sees the
//! same reconciliation a remote service would cause.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use crate::{
    domain::{
        aggregate,
        conversation::Conversation,
        ids::{ConversationId, MessageId, UserId},
        message::{DeliveryStatus, Message, MessagePatch, ReadReceipt},
    },
    usecases::contracts::{ApiError, Clock, FetchedPage, MessageApi, NewMessage, PageCursor},
};

/// Clock advanced explicitly by the replay. Clones share the instant.
#[derive(Debug, Clone, Default)]
pub struct ReplayClock {
    now_ms: Arc<AtomicI64>,
}

impl ReplayClock {
    pub fn starting_at(now_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ReplayClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Backend {
    conversations: Vec<Conversation>,
    messages: BTreeMap<ConversationId, Vec<Message>>,
    failures: HashSet<String>,
    next_id: u64,
}

impl Backend {
    fn message_mut(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<&mut Message, ApiError> {
        self.messages
            .get_mut(conversation_id)
            .and_then(|messages| messages.iter_mut().find(|message| &message.id == message_id))
            .ok_or(ApiError::NotFound)
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedApi {
    viewer: UserId,
    clock: ReplayClock,
    backend: Arc<Mutex<Backend>>,
}

impl ScriptedApi {
    pub fn new(
        viewer: UserId,
        clock: ReplayClock,
        conversations: Vec<Conversation>,
        messages: Vec<Message>,
    ) -> Self {
        let mut backend = Backend {
            conversations,
            ..Backend::default()
        };
        for message in messages {
            backend
                .messages
                .entry(message.conversation_id.clone())
                .or_default()
                .push(message);
        }

        Self {
            viewer,
            clock,
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    /// Makes the next call of `operation` fail with `ApiError::Unavailable`.
    pub fn fail_next(&self, operation: impl Into<String>) {
        self.lock().failures.insert(operation.into());
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, backend: &mut Backend, operation: &str) -> Result<(), ApiError> {
        if backend.failures.remove(operation) {
            tracing::debug!(operation, "scripted failure injected");
            return Err(ApiError::Unavailable);
        }
        Ok(())
    }
}

impl MessageApi for ScriptedApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let mut backend = self.lock();
        self.check(&mut backend, "list_conversations")?;

        let conversations = backend
            .conversations
            .iter()
            .map(|conversation| {
                let mut conversation = conversation.clone();
                let stored = backend.messages.get(&conversation.id);
                if let Some(latest) = stored.and_then(|messages| {
                    messages
                        .iter()
                        .max_by(|a, b| (a.created_at_ms, &a.id).cmp(&(b.created_at_ms, &b.id)))
                }) {
                    conversation.observe_message(latest);
                }
                let unread = stored
                    .map(|messages| aggregate::unread_count(messages.iter(), &self.viewer, None))
                    .unwrap_or(0);
                conversation.read_state_mut(&self.viewer).unread_count = unread;
                conversation
            })
            .collect();

        Ok(conversations)
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<&PageCursor>,
        limit: usize,
    ) -> Result<FetchedPage, ApiError> {
        let mut backend = self.lock();
        self.check(&mut backend, "fetch_messages")?;

        let mut older: Vec<Message> = backend
            .messages
            .get(conversation_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|message| before.map_or(true, |cursor| cursor.admits(message)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        older.sort_by(|a, b| (a.created_at_ms, &a.id).cmp(&(b.created_at_ms, &b.id)));

        let start = older.len().saturating_sub(limit);
        let page = older.split_off(start);

        Ok(FetchedPage {
            has_more: start > 0,
            next_cursor: page.first().map(PageCursor::of),
            messages: page,
        })
    }

    async fn create_message(&self, request: &NewMessage) -> Result<Message, ApiError> {
        let mut backend = self.lock();
        self.check(&mut backend, "create_message")?;

        backend.next_id += 1;
        let message = Message {
            id: MessageId::server(format!("srv-{}", backend.next_id)),
            conversation_id: request.conversation_id.clone(),
            sender_id: self.viewer.clone(),
            sender: None,
            content: request.content.clone(),
            media: request.media.clone(),
            reply_to: request.reply_to.clone(),
            created_at_ms: self.clock.now_ms(),
            edited_at_ms: None,
            deleted_at_ms: None,
            read_receipts: Vec::new(),
            status: DeliveryStatus::Confirmed,
        };
        backend
            .messages
            .entry(request.conversation_id.clone())
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    async fn edit_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        content: &str,
    ) -> Result<Message, ApiError> {
        let mut backend = self.lock();
        self.check(&mut backend, "edit_message")?;

        let now = self.clock.now_ms();
        let stored = backend.message_mut(conversation_id, message_id)?;
        *stored = stored.patched(&MessagePatch::edit(content, now));

        Ok(stored.clone())
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        let mut backend = self.lock();
        self.check(&mut backend, "delete_message")?;

        let now = self.clock.now_ms();
        let stored = backend.message_mut(conversation_id, message_id)?;
        *stored = stored.patched(&MessagePatch::soft_delete(now));

        Ok(())
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), ApiError> {
        let mut backend = self.lock();
        self.check(&mut backend, "mark_read")?;

        let now = self.clock.now_ms();
        for message_id in message_ids {
            if let Ok(stored) = backend.message_mut(conversation_id, message_id) {
                stored.add_receipt(ReadReceipt {
                    message_id: message_id.clone(),
                    user_id: self.viewer.clone(),
                    read_at_ms: now,
                });
            }
        }

        Ok(())
    }

    async fn send_typing(&self, _conversation_id: &ConversationId) -> Result<(), ApiError> {
        let mut backend = self.lock();
        self.check(&mut backend, "send_typing")
    }
}

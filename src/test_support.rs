use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::sync::Notify;

use crate::{
    domain::{
        conversation::Conversation,
        ids::{ConversationId, MessageId, UserId},
        message::{DeliveryStatus, Message},
    },
    usecases::{
        contracts::{ApiError, Clock, FetchedPage, MessageApi, NewMessage, PageCursor},
        sync_service::{SyncService, SyncSettings},
    },
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// 14 Feb 2026 09:00 UTC.
pub const NOW: i64 = 1_771_059_600_000;

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().expect("env lock should not be poisoned")
}

pub fn conversation_id() -> ConversationId {
    ConversationId::new("c1")
}

pub fn viewer() -> UserId {
    UserId::new("me")
}

/// Confirmed server message in conversation `c1` without relations.
pub fn message(id: &str, sender: &str, text: &str, created_at_ms: i64) -> Message {
    Message {
        id: MessageId::server(id),
        conversation_id: conversation_id(),
        sender_id: UserId::new(sender),
        sender: None,
        content: Some(text.to_owned()),
        media: Vec::new(),
        reply_to: None,
        created_at_ms,
        edited_at_ms: None,
        deleted_at_ms: None,
        read_receipts: Vec::new(),
        status: DeliveryStatus::Confirmed,
    }
}

pub fn pending_message(seq: u64, sender: &str, text: &str, created_at_ms: i64) -> Message {
    Message {
        id: MessageId::Temp(seq),
        status: DeliveryStatus::Pending,
        ..message("unused", sender, text, created_at_ms)
    }
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        viewer: viewer(),
        page_size: 50,
        edit_window_ms: 15 * 60 * 1_000,
        typing_ttl_ms: 5_000,
        preview_width: 50,
    }
}

pub fn service(api: FakeApi) -> SyncService<FakeApi, FixedClock> {
    SyncService::new(api, FixedClock::at(NOW), settings())
}

pub fn service_with_clock(api: FakeApi, clock: FixedClock) -> SyncService<FakeApi, FixedClock> {
    SyncService::new(api, clock, settings())
}

/// Messages `m<from>..=m<to>` from `alice`, one second apart.
pub fn history(from: u32, to: u32) -> Vec<Message> {
    (from..=to)
        .map(|n| message(&format!("m{n:03}"), "alice", &format!("text {n}"), i64::from(n) * 1_000))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    now_ms: Arc<AtomicI64>,
}

impl FixedClock {
    pub fn at(now_ms: i64) -> Self {
        let clock = Self::default();
        clock.set(now_ms);
        clock
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListConversations,
    FetchMessages {
        conversation_id: ConversationId,
        before: Option<PageCursor>,
        limit: usize,
    },
    CreateMessage(NewMessage),
    EditMessage {
        message_id: MessageId,
        content: String,
    },
    DeleteMessage(MessageId),
    MarkRead(Vec<MessageId>),
    SendTyping(ConversationId),
}

#[derive(Debug, Default)]
struct FakeApiState {
    conversations: Vec<Conversation>,
    pages: VecDeque<Result<FetchedPage, ApiError>>,
    created: VecDeque<Result<Message, ApiError>>,
    edited: VecDeque<Result<Message, ApiError>>,
    failures: HashMap<&'static str, ApiError>,
    calls: Vec<ApiCall>,
    gate: Option<Arc<Notify>>,
}

/// Scriptable in-memory [`MessageApi`]. Clones share state so a test can keep
/// a handle after moving one into the service.
#[derive(Debug, Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeApiState>>,
}

impl FakeApi {
    pub fn with_conversations(self, conversations: Vec<Conversation>) -> Self {
        self.lock().conversations = conversations;
        self
    }

    pub fn push_page(&self, messages: Vec<Message>, has_more: bool) {
        self.lock().pages.push_back(Ok(FetchedPage {
            messages,
            has_more,
            next_cursor: None,
        }));
    }

    pub fn push_page_error(&self, error: ApiError) {
        self.lock().pages.push_back(Err(error));
    }

    pub fn push_created(&self, result: Result<Message, ApiError>) {
        self.lock().created.push_back(result);
    }

    pub fn push_edited(&self, result: Result<Message, ApiError>) {
        self.lock().edited.push_back(result);
    }

    /// Makes every later call of `operation` fail with `error`.
    pub fn fail(&self, operation: &'static str, error: ApiError) {
        self.lock().failures.insert(operation, error);
    }

    /// Holds every later call until the returned handle is notified once per call.
    pub fn gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ApiCall::FetchMessages { .. }))
            .count()
    }

    /// Yields until at least `count` calls were recorded.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.lock().calls.len() < count {
            tokio::task::yield_now().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeApiState> {
        self.state.lock().expect("fake api lock should not be poisoned")
    }

    async fn enter(&self, operation: &'static str, call: ApiCall) -> Result<(), ApiError> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(call);
            state.gate.clone()
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self.lock().failures.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl MessageApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.enter("list_conversations", ApiCall::ListConversations)
            .await?;
        Ok(self.lock().conversations.clone())
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<&PageCursor>,
        limit: usize,
    ) -> Result<FetchedPage, ApiError> {
        self.enter(
            "fetch_messages",
            ApiCall::FetchMessages {
                conversation_id: conversation_id.clone(),
                before: before.cloned(),
                limit,
            },
        )
        .await?;

        self.lock().pages.pop_front().unwrap_or(Ok(FetchedPage {
            messages: Vec::new(),
            has_more: false,
            next_cursor: None,
        }))
    }

    async fn create_message(&self, request: &NewMessage) -> Result<Message, ApiError> {
        self.enter("create_message", ApiCall::CreateMessage(request.clone()))
            .await?;

        let mut state = self.lock();
        let sequence = state.calls.len();
        state.created.pop_front().unwrap_or_else(|| {
            Ok(Message {
                conversation_id: request.conversation_id.clone(),
                content: request.content.clone(),
                media: request.media.clone(),
                reply_to: request.reply_to.clone(),
                ..message(&format!("srv-{sequence}"), viewer().as_str(), "", NOW + 1)
            })
        })
    }

    async fn edit_message(
        &self,
        _conversation_id: &ConversationId,
        message_id: &MessageId,
        content: &str,
    ) -> Result<Message, ApiError> {
        self.enter(
            "edit_message",
            ApiCall::EditMessage {
                message_id: message_id.clone(),
                content: content.to_owned(),
            },
        )
        .await?;

        self.lock()
            .edited
            .pop_front()
            .unwrap_or(Err(ApiError::Unavailable))
    }

    async fn delete_message(
        &self,
        _conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        self.enter("delete_message", ApiCall::DeleteMessage(message_id.clone()))
            .await
    }

    async fn mark_read(
        &self,
        _conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), ApiError> {
        self.enter("mark_read", ApiCall::MarkRead(message_ids.to_vec()))
            .await
    }

    async fn send_typing(&self, conversation_id: &ConversationId) -> Result<(), ApiError> {
        self.enter("send_typing", ApiCall::SendTyping(conversation_id.clone()))
            .await
    }
}

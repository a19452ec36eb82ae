//! Synchronization service: the single owner of every conversation's cache,
//! session and aggregate state.
//!
//! All mutation goes through [`SyncService::merge`] or one of the use cases
//! implemented on top of it (pagination, optimistic writes, realtime events).
//! The state lock is never held across a network round trip; each round trip
//! runs against a [`SessionTicket`] so a response for a conversation that was
//! left or reopened meanwhile is dropped instead of merged.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{mpsc, Mutex, PoisonError},
};

use tokio::sync::watch;

use crate::{
    domain::{
        aggregate,
        conversation::{Conversation, ConversationKind},
        events::{ConnectivityStatus, RealtimeEvent, UserChannelEvent},
        grouping::{self, PresentationHints, ReadMarker},
        ids::{ConversationId, MessageId, UserId},
        message::Message,
        message_cache::MessageCache,
        timeline::{MergeOp, MergeOutcome},
        typing::TypingTracker,
    },
    infra::config::SyncConfig,
    realtime::adapter,
};

use super::{
    contracts::{Clock, MessageApi, PageCursor, SystemClock},
    error::SyncError,
    load_older::{normalized_page_size, Page},
    send_message::OutgoingState,
};

const LATE_RESPONSE_DROPPED: &str = "SYNC_LATE_RESPONSE_DROPPED";
const REALTIME_EVENT_DROPPED: &str = "SYNC_REALTIME_EVENT_DROPPED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub viewer: UserId,
    pub page_size: usize,
    pub edit_window_ms: i64,
    pub typing_ttl_ms: i64,
    pub preview_width: usize,
}

impl SyncSettings {
    pub fn from_config(viewer: UserId, config: &SyncConfig) -> Self {
        Self {
            viewer,
            page_size: normalized_page_size(config.page_size),
            edit_window_ms: i64::try_from(config.edit_window_secs.saturating_mul(1_000))
                .unwrap_or(i64::MAX),
            typing_ttl_ms: i64::try_from(config.typing_ttl_ms).unwrap_or(i64::MAX),
            preview_width: config.preview_width,
        }
    }
}

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    TimelineChanged(ConversationId),
    ConversationsChanged,
    /// An optimistic operation was rolled back.
    OperationFailed {
        conversation_id: ConversationId,
        code: &'static str,
    },
    ConnectivityChanged {
        conversation_id: ConversationId,
        status: ConnectivityStatus,
    },
}

/// Message plus its presentation hints, in timeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub message: Message,
    pub hints: PresentationHints,
    /// Cached message this one replies to; `None` when not loaded.
    pub reply_to: Option<Message>,
}

#[derive(Debug, Default)]
pub(super) struct PaginationState {
    pub exhausted: bool,
    pub next_cursor: Option<PageCursor>,
    pub in_flight: Option<watch::Receiver<Option<Result<Page, SyncError>>>>,
}

#[derive(Debug)]
pub(super) struct Session {
    pub generation: u64,
    pub stop_tx: watch::Sender<bool>,
    pub pagination: PaginationState,
    pub typing: TypingTracker,
    pub realtime: ConnectivityStatus,
}

/// Capability to merge the result of one round trip into one session.
#[derive(Debug, Clone)]
pub(super) struct SessionTicket {
    pub conversation_id: ConversationId,
    pub generation: u64,
    stop_rx: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
pub(super) struct SyncState {
    pub cache: MessageCache,
    pub directory: BTreeMap<ConversationId, Conversation>,
    pub sessions: HashMap<ConversationId, Session>,
    pub outbox: BTreeMap<MessageId, (ConversationId, OutgoingState)>,
    next_temp_id: u64,
    next_generation: u64,
    subscribers: Vec<mpsc::Sender<SyncNotice>>,
}

impl SyncState {
    pub fn ticket(&self, conversation_id: &ConversationId) -> Result<SessionTicket, SyncError> {
        let session = self
            .sessions
            .get(conversation_id)
            .ok_or_else(|| SyncError::ConversationNotOpen(conversation_id.clone()))?;

        Ok(SessionTicket {
            conversation_id: conversation_id.clone(),
            generation: session.generation,
            stop_rx: session.stop_tx.subscribe(),
        })
    }

    /// Whether the session a ticket was issued for is still the live one.
    pub fn is_current(&self, ticket: &SessionTicket) -> bool {
        let current = self
            .sessions
            .get(&ticket.conversation_id)
            .is_some_and(|session| session.generation == ticket.generation);

        if !current {
            tracing::debug!(
                code = LATE_RESPONSE_DROPPED,
                conversation_id = %ticket.conversation_id,
                generation = ticket.generation,
                "dropping response for a conversation that was left"
            );
        }
        current
    }

    pub fn allocate_temp_id(&mut self) -> MessageId {
        self.next_temp_id += 1;
        MessageId::Temp(self.next_temp_id)
    }

    pub fn merge(&mut self, conversation_id: &ConversationId, op: MergeOp) -> MergeOutcome {
        let outcome = self.cache.merge(conversation_id, op);
        if outcome.changed() {
            self.timeline_changed(conversation_id);
        }
        outcome
    }

    /// Refreshes the denormalized last message and notifies subscribers.
    pub fn timeline_changed(&mut self, conversation_id: &ConversationId) {
        if let Some(latest) = self
            .cache
            .timeline(conversation_id)
            .and_then(|timeline| timeline.iter().rev().find(|message| !message.is_pending()))
            .cloned()
        {
            self.conversation_mut(conversation_id).observe_message(&latest);
        }
        self.notify(SyncNotice::TimelineChanged(conversation_id.clone()));
    }

    pub fn conversation_mut(&mut self, conversation_id: &ConversationId) -> &mut Conversation {
        self.directory
            .entry(conversation_id.clone())
            .or_insert_with(|| Conversation::new(conversation_id.clone(), ConversationKind::Direct))
    }

    pub fn unread_for(&self, conversation_id: &ConversationId, viewer: &UserId) -> u32 {
        let last_read_at = self
            .directory
            .get(conversation_id)
            .and_then(|conversation| conversation.read_state(viewer))
            .and_then(|state| state.last_read_at_ms);

        self.cache
            .timeline(conversation_id)
            .map(|timeline| aggregate::unread_count(timeline.iter(), viewer, last_read_at))
            .unwrap_or(0)
    }

    pub fn notify(&mut self, notice: SyncNotice) {
        self.subscribers
            .retain(|subscriber| subscriber.send(notice.clone()).is_ok());
    }
}

pub struct SyncService<A, C = SystemClock> {
    pub(super) api: A,
    pub(super) clock: C,
    pub(super) settings: SyncSettings,
    state: Mutex<SyncState>,
}

impl<A, C> SyncService<A, C>
where
    A: MessageApi,
    C: Clock,
{
    pub fn new(api: A, clock: C, settings: SyncSettings) -> Self {
        Self {
            api,
            clock,
            settings,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SyncNotice> {
        let (tx, rx) = mpsc::channel();
        self.with_state(|state| state.subscribers.push(tx));
        rx
    }

    /// Starts a session for `conversation_id`. Opening an open conversation
    /// keeps the existing session.
    pub fn open_conversation(&self, conversation_id: &ConversationId) {
        self.with_state(|state| {
            if state.sessions.contains_key(conversation_id) {
                return;
            }

            state.next_generation += 1;
            let (stop_tx, _) = watch::channel(false);
            state.sessions.insert(
                conversation_id.clone(),
                Session {
                    generation: state.next_generation,
                    stop_tx,
                    pagination: PaginationState::default(),
                    typing: TypingTracker::default(),
                    realtime: ConnectivityStatus::Connecting,
                },
            );

            tracing::info!(
                conversation_id = %conversation_id,
                generation = state.next_generation,
                "conversation opened"
            );
        });
    }

    /// Tears down a conversation: stops its realtime subscription, abandons
    /// in-flight requests and purges its cached messages.
    pub fn leave_conversation(&self, conversation_id: &ConversationId) {
        self.with_state(|state| {
            let Some(session) = state.sessions.remove(conversation_id) else {
                return;
            };

            let _ = session.stop_tx.send(true);
            let purged = state.cache.teardown(conversation_id);
            state
                .outbox
                .retain(|_, (owner, _)| owner != conversation_id);

            tracing::info!(
                conversation_id = %conversation_id,
                generation = session.generation,
                purged,
                "conversation left"
            );
        });
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_open(&self, conversation_id: &ConversationId) -> bool {
        self.with_state(|state| state.sessions.contains_key(conversation_id))
    }

    /// Stop signal of the live session, flipped to `true` when it is left.
    pub fn stop_signal(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<watch::Receiver<bool>, SyncError> {
        self.with_state(|state| state.ticket(conversation_id).map(|ticket| ticket.stop_rx))
    }

    pub fn merge(&self, conversation_id: &ConversationId, op: MergeOp) -> MergeOutcome {
        self.with_state(|state| state.merge(conversation_id, op))
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.with_state(|state| state.cache.messages(conversation_id))
    }

    pub fn message(&self, conversation_id: &ConversationId, id: &MessageId) -> Option<Message> {
        self.with_state(|state| {
            state
                .cache
                .timeline(conversation_id)
                .and_then(|timeline| timeline.get(id))
                .cloned()
        })
    }

    pub fn unread_count(&self, conversation_id: &ConversationId) -> u32 {
        self.with_state(|state| state.unread_for(conversation_id, &self.settings.viewer))
    }

    /// Messages with grouping hints for the viewer.
    pub fn timeline_view(&self, conversation_id: &ConversationId) -> Vec<TimelineEntry> {
        let (messages, replies, last_read_at) = self.with_state(|state| {
            let last_read_at = state
                .directory
                .get(conversation_id)
                .and_then(|conversation| conversation.read_state(&self.settings.viewer))
                .and_then(|read_state| read_state.last_read_at_ms);
            let messages = state.cache.messages(conversation_id);
            let replies: Vec<Option<Message>> = match state.cache.timeline(conversation_id) {
                Some(timeline) => messages
                    .iter()
                    .map(|message| timeline.reply_target(&message.id).cloned())
                    .collect(),
                None => vec![None; messages.len()],
            };
            (messages, replies, last_read_at)
        });

        let marker = ReadMarker {
            viewer: &self.settings.viewer,
            last_read_at_ms: last_read_at,
        };
        let hints = grouping::build_hints(&messages, marker);

        messages
            .into_iter()
            .zip(hints)
            .zip(replies)
            .map(|((message, hints), reply_to)| TimelineEntry {
                message,
                hints,
                reply_to,
            })
            .collect()
    }

    /// Applies one event from a conversation's message channel.
    pub fn apply_realtime(&self, event: &RealtimeEvent) -> MergeOutcome {
        self.with_state(|state| {
            if !state.sessions.contains_key(&event.channel) {
                tracing::debug!(
                    code = REALTIME_EVENT_DROPPED,
                    conversation_id = %event.channel,
                    event_kind = event.kind(),
                    "realtime event for a conversation that is not open"
                );
                return MergeOutcome::Unchanged;
            }

            match adapter::to_merge_op(event) {
                Some(op) => state.merge(&event.channel, op),
                None => MergeOutcome::Unchanged,
            }
        })
    }

    /// Applies one event from the viewer's own channel.
    pub fn apply_user_event(&self, event: &UserChannelEvent) {
        self.with_state(|state| {
            adapter::apply_user_event(&mut state.directory, event);
            state.notify(SyncNotice::ConversationsChanged);
        });
    }

    pub(super) fn with_state<R>(&self, f: impl FnOnce(&mut SyncState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub(super) fn ticket(&self, conversation_id: &ConversationId) -> Result<SessionTicket, SyncError> {
        self.with_state(|state| state.ticket(conversation_id))
    }

    /// Runs one network round trip, abandoning it once the session stops.
    pub(super) async fn run_cancellable<T, F>(
        &self,
        ticket: &SessionTicket,
        request: F,
    ) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, super::contracts::ApiError>>,
    {
        let mut stop_rx = ticket.stop_rx.clone();

        tokio::select! {
            result = request => result.map_err(SyncError::from),
            () = stopped(&mut stop_rx) => Err(SyncError::Cancelled),
        }
    }
}

async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

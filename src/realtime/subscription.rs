use std::sync::Arc;

use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    domain::{
        events::{ConnectivityStatus, RealtimeEvent, UserChannelEvent},
        ids::{ConversationId, UserId},
        typing::TypingEvent,
    },
    usecases::{
        contracts::{Clock, MessageApi},
        error::SyncError,
        sync_service::SyncService,
    },
};

const SUBSCRIPTION_STARTED: &str = "REALTIME_SUBSCRIPTION_STARTED";
const SUBSCRIPTION_STOPPED: &str = "REALTIME_SUBSCRIPTION_STOPPED";
const SUBSCRIPTION_STOP_SIGNAL_SENT: &str = "REALTIME_SUBSCRIPTION_STOP_SIGNAL_SENT";
const SUBSCRIPTION_FEED_CLOSED: &str = "REALTIME_SUBSCRIPTION_FEED_CLOSED";
const SUBSCRIPTION_RESYNC_FAILED: &str = "REALTIME_SUBSCRIPTION_RESYNC_FAILED";

/// Item delivered by a conversation's realtime transport.
#[derive(Debug)]
pub enum FeedItem {
    Event(RealtimeEvent),
    Typing { user_id: UserId, event: TypingEvent },
    /// Transport lost its connection; events may be missed until reconnect.
    Dropped,
    Reconnected,
    /// Answered once every item queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

/// Item delivered on the viewer's own channel.
#[derive(Debug)]
pub enum UserFeedItem {
    Event(UserChannelEvent),
    /// Answered once every item queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

/// Background task feeding one transport into the sync service. Stops when
/// dropped, when the conversation is left, or when the feed closes.
#[derive(Debug)]
pub struct RealtimeSubscription {
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSubscription {
    /// Subscribes an open conversation to its message channel.
    pub fn start<A, C>(
        runtime: &Handle,
        service: Arc<SyncService<A, C>>,
        conversation_id: ConversationId,
        feed: mpsc::Receiver<FeedItem>,
    ) -> Result<Self, SyncError>
    where
        A: MessageApi,
        C: Clock + 'static,
    {
        let session_stop = service.stop_signal(&conversation_id)?;
        let (stop_tx, stop_rx) = watch::channel(false);
        service.set_connectivity(&conversation_id, ConnectivityStatus::Connected);

        tracing::info!(
            code = SUBSCRIPTION_STARTED,
            conversation_id = %conversation_id,
            "realtime subscription started"
        );

        let task = runtime.spawn(run_conversation_feed(
            service,
            conversation_id,
            feed,
            stop_rx,
            session_stop,
        ));

        Ok(Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Subscribes to the viewer's own channel (conversation and participant
    /// changes).
    pub fn start_user<A, C>(
        runtime: &Handle,
        service: Arc<SyncService<A, C>>,
        feed: mpsc::Receiver<UserFeedItem>,
    ) -> Self
    where
        A: MessageApi,
        C: Clock + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::info!(
            code = SUBSCRIPTION_STARTED,
            viewer = %service.settings().viewer,
            "user channel subscription started"
        );

        let task = runtime.spawn(run_user_feed(service, feed, stop_rx));

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Signals the task to stop and waits for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "realtime subscription task ended abnormally");
            }
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
            tracing::debug!(
                code = SUBSCRIPTION_STOP_SIGNAL_SENT,
                "realtime subscription stop signal sent"
            );
        }
    }
}

async fn run_conversation_feed<A, C>(
    service: Arc<SyncService<A, C>>,
    conversation_id: ConversationId,
    mut feed: mpsc::Receiver<FeedItem>,
    mut stop_rx: watch::Receiver<bool>,
    mut session_stop: watch::Receiver<bool>,
) where
    A: MessageApi,
    C: Clock,
{
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            changed = session_stop.changed() => {
                if changed.is_err() || *session_stop.borrow() {
                    break;
                }
            }
            item = feed.recv() => {
                let Some(item) = item else {
                    tracing::warn!(
                        code = SUBSCRIPTION_FEED_CLOSED,
                        conversation_id = %conversation_id,
                        "realtime feed closed"
                    );
                    service.set_connectivity(&conversation_id, ConnectivityStatus::Disconnected);
                    break;
                };

                handle_item(&service, &conversation_id, item).await;
            }
        }
    }

    tracing::info!(
        code = SUBSCRIPTION_STOPPED,
        conversation_id = %conversation_id,
        "realtime subscription stopped"
    );
}

/// Applies one feed item to the service. Also used inline for conversations
/// that have no running subscription.
pub async fn handle_item<A, C>(service: &SyncService<A, C>, conversation_id: &ConversationId, item: FeedItem)
where
    A: MessageApi,
    C: Clock,
{
    match item {
        FeedItem::Event(event) => {
            let outcome = service.apply_realtime(&event);
            tracing::trace!(
                conversation_id = %conversation_id,
                event_kind = event.kind(),
                outcome = ?outcome,
                "realtime event applied"
            );
        }
        FeedItem::Typing { user_id, event } => {
            service.remote_typing(conversation_id, &user_id, event);
        }
        FeedItem::Dropped => {
            service.set_connectivity(conversation_id, ConnectivityStatus::Disconnected);
        }
        FeedItem::Reconnected => {
            if let Err(error) = service.resync_after_reconnect(conversation_id).await {
                tracing::warn!(
                    code = SUBSCRIPTION_RESYNC_FAILED,
                    conversation_id = %conversation_id,
                    error = %error,
                    "resync after reconnect failed"
                );
            }
        }
        FeedItem::Barrier(done) => {
            let _ = done.send(());
        }
    }
}

async fn run_user_feed<A, C>(
    service: Arc<SyncService<A, C>>,
    mut feed: mpsc::Receiver<UserFeedItem>,
    mut stop_rx: watch::Receiver<bool>,
) where
    A: MessageApi,
    C: Clock,
{
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            item = feed.recv() => {
                match item {
                    Some(UserFeedItem::Event(event)) => service.apply_user_event(&event),
                    Some(UserFeedItem::Barrier(done)) => {
                        let _ = done.send(());
                    }
                    None => {
                        tracing::warn!(code = SUBSCRIPTION_FEED_CLOSED, "user channel feed closed");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(code = SUBSCRIPTION_STOPPED, "user channel subscription stopped");
}

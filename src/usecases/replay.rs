//! Drives a [`ReplayScript`] through the sync service against the scripted
//! backend and renders what a client would show.
//!
//! Realtime, typing and connectivity steps travel through the same
//! subscription tasks a live transport would feed; each delivery waits on a
//! feed barrier so the report reflects the step that produced it.

use std::{
    collections::HashMap,
    sync::{mpsc, Arc},
};

use tokio::{
    runtime::Handle,
    sync::{mpsc as feed, oneshot},
};

use crate::{
    domain::{
        events::UserChannelEvent,
        grouping::TimestampDivider,
        ids::{ConversationId, MessageId, UserId},
        message::Message,
        typing::TypingEvent,
    },
    infra::{
        config::SyncConfig,
        replay_script::{conversation_from_row, ReplayScript, ReplayStep},
        scripted_api::{ReplayClock, ScriptedApi},
    },
    realtime::subscription::{handle_item, FeedItem, RealtimeSubscription, UserFeedItem},
};

use super::{
    contracts::{Clock, SystemClock},
    error::SyncError,
    send_message::SendMessageCommand,
    sync_service::{SyncNotice, SyncService, SyncSettings, TimelineEntry},
};

const REPLAY_STEP_FAILED: &str = "REPLAY_STEP_FAILED";
const REPLAY_FEED_CLOSED: &str = "REPLAY_FEED_CLOSED";

const FEED_CAPACITY: usize = 64;

type ReplayService = SyncService<ScriptedApi, ReplayClock>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub lines: Vec<String>,
    pub failed_steps: usize,
}

impl ReplayReport {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

struct ConversationFeed {
    tx: feed::Sender<FeedItem>,
    subscription: RealtimeSubscription,
}

/// Service, scripted backend and the subscriptions a replay keeps alive.
struct ReplayRun {
    service: Arc<ReplayService>,
    api: ScriptedApi,
    clock: ReplayClock,
    feeds: HashMap<ConversationId, ConversationFeed>,
    user_tx: feed::Sender<UserFeedItem>,
    user_subscription: RealtimeSubscription,
}

pub async fn run_replay(script: ReplayScript, config: &SyncConfig) -> ReplayReport {
    let clock = ReplayClock::starting_at(script.start_at_ms.unwrap_or_else(|| SystemClock.now_ms()));
    let api = ScriptedApi::new(
        script.viewer.clone(),
        clock.clone(),
        script.conversations.iter().map(conversation_from_row).collect(),
        script.messages.iter().map(|message| message.to_message()).collect(),
    );
    let service = Arc::new(SyncService::new(
        api.clone(),
        clock.clone(),
        SyncSettings::from_config(script.viewer.clone(), config),
    ));
    let notices = service.subscribe();

    let (user_tx, user_rx) = feed::channel(FEED_CAPACITY);
    let user_subscription =
        RealtimeSubscription::start_user(&Handle::current(), Arc::clone(&service), user_rx);
    let mut run = ReplayRun {
        service,
        api,
        clock,
        feeds: HashMap::new(),
        user_tx,
        user_subscription,
    };

    let mut report = ReplayReport::default();
    for (index, step) in script.steps.iter().enumerate() {
        let label = step.label();
        match run.apply(step).await {
            Ok(lines) => {
                tracing::debug!(step = index + 1, action = label, "replay step applied");
                let mut lines = lines.into_iter();
                let head = lines.next().unwrap_or_default();
                report.push(format!("{:>3} {label}: {head}", index + 1));
                report.lines.extend(lines);
            }
            Err(error) => {
                tracing::warn!(
                    code = REPLAY_STEP_FAILED,
                    step = index + 1,
                    action = label,
                    error = %error,
                    "replay step failed"
                );
                report.failed_steps += 1;
                report.push(format!("{:>3} {label}: error {}", index + 1, error.code()));
            }
        }
        report_rollbacks(&notices, &mut report);
    }

    report.push("conversations:");
    for summary in run.service.conversation_summaries() {
        report.push(format!(
            "  {} [{}] {}{}",
            summary.title,
            summary.unread_count,
            summary.preview,
            summary
                .last_activity_label
                .map(|label| format!(" ({label})"))
                .unwrap_or_default()
        ));
    }

    run.shutdown().await;
    report
}

fn report_rollbacks(notices: &mpsc::Receiver<SyncNotice>, report: &mut ReplayReport) {
    for notice in notices.try_iter() {
        if let SyncNotice::OperationFailed {
            conversation_id,
            code,
        } = notice
        {
            report.push(format!("    ! rolled back in {conversation_id} ({code})"));
        }
    }
}

impl ReplayRun {
    async fn apply(&mut self, step: &ReplayStep) -> Result<Vec<String>, SyncError> {
        let service = Arc::clone(&self.service);
        let line = match step {
            ReplayStep::Open { conversation_id } => {
                self.open(conversation_id)?;
                format!("{conversation_id}")
            }
            ReplayStep::Leave { conversation_id } => {
                service.leave_conversation(conversation_id);
                if let Some(feed) = self.feeds.remove(conversation_id) {
                    feed.subscription.shutdown().await;
                }
                format!("{conversation_id}")
            }
            ReplayStep::LoadOlder { conversation_id } => {
                let page = service.load_older(conversation_id).await?;
                format!("{} messages, has_more={}", page.messages.len(), page.has_more)
            }
            ReplayStep::Send {
                conversation_id,
                text,
                reply_to,
            } => {
                let command = SendMessageCommand {
                    reply_to: reply_to.clone(),
                    ..SendMessageCommand::text(conversation_id.clone(), text.clone())
                };
                let sent = service.send_message(command).await?;
                format!("confirmed as {}", sent.id)
            }
            ReplayStep::Edit {
                conversation_id,
                message_id,
                text,
            } => {
                let edited = service.edit_message(conversation_id, message_id, text).await?;
                format!("{} edited", edited.id)
            }
            ReplayStep::Delete {
                conversation_id,
                message_id,
            } => {
                service.delete_message(conversation_id, message_id).await?;
                format!("{message_id} deleted")
            }
            ReplayStep::MarkRead {
                conversation_id,
                message_ids,
            } => {
                let ids: Vec<MessageId> = if message_ids.is_empty() {
                    service
                        .messages(conversation_id)
                        .into_iter()
                        .map(|message| message.id)
                        .collect()
                } else {
                    message_ids.clone()
                };
                let unread = service.mark_read(conversation_id, &ids).await?;
                format!("{unread} unread")
            }
            ReplayStep::Typing {
                conversation_id,
                user_id: None,
            } => {
                let sent = service.typing_keystroke(conversation_id).await?;
                if sent {
                    "signal sent".to_owned()
                } else {
                    "debounced".to_owned()
                }
            }
            ReplayStep::Typing {
                conversation_id,
                user_id: Some(user_id),
            } => {
                self.deliver(
                    conversation_id,
                    FeedItem::Typing {
                        user_id: user_id.clone(),
                        event: TypingEvent::Keystroke,
                    },
                )
                .await;
                format!("{user_id} typing")
            }
            ReplayStep::TypingStop {
                conversation_id,
                user_id,
            } => {
                match user_id {
                    Some(user_id) => {
                        self.deliver(
                            conversation_id,
                            FeedItem::Typing {
                                user_id: user_id.clone(),
                                event: TypingEvent::Stop,
                            },
                        )
                        .await
                    }
                    None => service.typing_stopped(conversation_id),
                }
                "stopped".to_owned()
            }
            ReplayStep::Realtime { event } => {
                let before = service.messages(&event.channel);
                self.deliver(&event.channel, FeedItem::Event(event.clone())).await;
                let changed = service.messages(&event.channel) != before;
                format!(
                    "{} {}",
                    event.kind(),
                    if changed { "applied" } else { "no change" }
                )
            }
            ReplayStep::User { event } => {
                self.deliver_user(event.clone()).await;
                "applied".to_owned()
            }
            ReplayStep::Disconnect { conversation_id } => {
                self.deliver(conversation_id, FeedItem::Dropped).await;
                format!("{conversation_id} offline")
            }
            ReplayStep::Reconnect { conversation_id } => {
                self.deliver(conversation_id, FeedItem::Reconnected).await;
                format!(
                    "{} messages cached",
                    service.messages(conversation_id).len()
                )
            }
            ReplayStep::Refresh => {
                let summaries = service.refresh_conversations().await?;
                format!("{} conversations", summaries.len())
            }
            ReplayStep::Resync => {
                let resync = service.resync().await?;
                format!(
                    "{} conversations, {} refreshed, {} failed",
                    resync.conversations,
                    resync.refreshed.len(),
                    resync.failed.len()
                )
            }
            ReplayStep::Advance { ms } => {
                self.clock.advance(*ms);
                format!("+{ms} ms")
            }
            ReplayStep::FailNext { operation } => {
                self.api.fail_next(operation.clone());
                operation.clone()
            }
            ReplayStep::Show { conversation_id } => {
                return Ok(show(&service, conversation_id));
            }
        };

        Ok(vec![line])
    }

    /// Opens the conversation and subscribes it to its message channel.
    fn open(&mut self, conversation_id: &ConversationId) -> Result<(), SyncError> {
        self.service.open_conversation(conversation_id);
        if self.feeds.contains_key(conversation_id) {
            return Ok(());
        }

        let (tx, rx) = feed::channel(FEED_CAPACITY);
        let subscription = RealtimeSubscription::start(
            &Handle::current(),
            Arc::clone(&self.service),
            conversation_id.clone(),
            rx,
        )?;
        self.feeds
            .insert(conversation_id.clone(), ConversationFeed { tx, subscription });
        Ok(())
    }

    /// Hands `item` to the conversation's subscription and waits until it
    /// was handled. Without a live subscription the item is handled inline.
    async fn deliver(&self, conversation_id: &ConversationId, item: FeedItem) {
        let Some(feed) = self.feeds.get(conversation_id) else {
            handle_item(self.service.as_ref(), conversation_id, item).await;
            return;
        };

        if let Err(feed::error::SendError(item)) = feed.tx.send(item).await {
            tracing::warn!(
                code = REPLAY_FEED_CLOSED,
                conversation_id = %conversation_id,
                "realtime feed closed; handling item inline"
            );
            handle_item(self.service.as_ref(), conversation_id, item).await;
            return;
        }

        let (done, handled) = oneshot::channel();
        if feed.tx.send(FeedItem::Barrier(done)).await.is_err() || handled.await.is_err() {
            tracing::warn!(
                code = REPLAY_FEED_CLOSED,
                conversation_id = %conversation_id,
                "realtime feed closed before the item was confirmed"
            );
        }
    }

    async fn deliver_user(&self, event: UserChannelEvent) {
        if let Err(feed::error::SendError(item)) = self.user_tx.send(UserFeedItem::Event(event)).await {
            tracing::warn!(code = REPLAY_FEED_CLOSED, "user feed closed; handling event inline");
            if let UserFeedItem::Event(event) = item {
                self.service.apply_user_event(&event);
            }
            return;
        }

        let (done, handled) = oneshot::channel();
        if self.user_tx.send(UserFeedItem::Barrier(done)).await.is_err() || handled.await.is_err() {
            tracing::warn!(
                code = REPLAY_FEED_CLOSED,
                "user feed closed before the event was confirmed"
            );
        }
    }

    async fn shutdown(self) {
        for (_, feed) in self.feeds {
            feed.subscription.shutdown().await;
        }
        self.user_subscription.shutdown().await;
    }
}

fn show(service: &ReplayService, conversation_id: &ConversationId) -> Vec<String> {
    let viewer = &service.settings().viewer;
    let entries = service.timeline_view(conversation_id);

    let mut lines = vec![format!(
        "{conversation_id}, {} messages, {} unread",
        entries.len(),
        service.unread_count(conversation_id)
    )];
    lines.extend(render_timeline(&entries, viewer));

    let typing = service.typing_users(conversation_id);
    if !typing.is_empty() {
        let names: Vec<&str> = typing.iter().map(UserId::as_str).collect();
        lines.push(format!("    {} typing…", names.join(", ")));
    }

    lines
}

/// Text rendering of a timeline. `*` marks the message carrying the avatar,
/// the last one of a sender run.
pub fn render_timeline(entries: &[TimelineEntry], viewer: &UserId) -> Vec<String> {
    let mut lines = Vec::with_capacity(entries.len());

    for TimelineEntry {
        message,
        hints,
        reply_to,
    } in entries
    {
        match &hints.timestamp_divider {
            Some(TimestampDivider::Day(label)) => lines.push(format!("    ---- {label} ----")),
            Some(TimestampDivider::Time(label)) => lines.push(format!("    {label}")),
            None => {}
        }
        if hints.first_unread_divider {
            lines.push("    ---- unread ----".to_owned());
        }

        let sender = sender_label(message, viewer);

        let mut line = format!(
            "  {} {sender}: {}",
            if hints.show_avatar { '*' } else { ' ' },
            message.display_content()
        );
        match (reply_to, &message.reply_to) {
            (Some(target), _) => {
                line.push_str(&format!(
                    " [re {}: {}]",
                    sender_label(target, viewer),
                    target.display_content()
                ));
            }
            (None, Some(reply_id)) => line.push_str(&format!(" [re {reply_id}]")),
            (None, None) => {}
        }
        if message.is_edited() && !message.is_deleted() {
            line.push_str(" (edited)");
        }
        if message.is_pending() {
            line.push_str(" (sending)");
        }
        lines.push(line);
    }

    lines
}

fn sender_label(message: &Message, viewer: &UserId) -> String {
    if &message.sender_id == viewer {
        "you".to_owned()
    } else {
        message
            .sender
            .as_ref()
            .map(|profile| profile.display_name.clone())
            .unwrap_or_else(|| message.sender_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(steps: &str) -> ReplayScript {
        let raw = format!(
            r#"
viewer = "me"
start_at_ms = 1771059600000

[[conversations]]
id = "c1"
kind = "direct"
participants = ["me", "alice"]

[[messages]]
id = "m1"
conversation_id = "c1"
sender_id = "alice"
sender_name = "Alice"
content = "hello"
created_at_ms = 1771059000000

[[messages]]
id = "m2"
conversation_id = "c1"
sender_id = "me"
content = "hi"
created_at_ms = 1771059300000

{steps}
"#
        );
        toml::from_str(&raw).expect("script should parse")
    }

    /// Lines printed by the `show` step starting with `head`, up to the next step.
    fn show_block<'a>(report: &'a ReplayReport, head: &str) -> Vec<&'a str> {
        let start = report
            .lines
            .iter()
            .position(|line| line.starts_with(head))
            .expect("show step is reported");
        let mut block = vec![report.lines[start].as_str()];
        block.extend(
            report.lines[start + 1..]
                .iter()
                .take_while(|line| line.starts_with("    ") || line.starts_with("  * "))
                .map(String::as_str),
        );
        block
    }

    #[tokio::test]
    async fn replays_send_and_realtime_echo_into_one_entry() {
        let script = script(
            r#"
[[steps]]
action = "open"
conversation_id = "c1"

[[steps]]
action = "load_older"
conversation_id = "c1"

[[steps]]
action = "send"
conversation_id = "c1"
text = "how are you?"

[[steps]]
action = "realtime"
[steps.event]
channel = "c1"
committed_at_ms = 1771059600000
kind = "insert"
[steps.event.row]
id = "srv-1"
conversation_id = "c1"
sender_id = "me"
content = "how are you?"
created_at_ms = 1771059600000

[[steps]]
action = "show"
conversation_id = "c1"
"#,
        );

        let report = run_replay(script, &SyncConfig::default()).await;

        assert_eq!(report.failed_steps, 0);
        assert!(report.lines.contains(&"  2 load_older: 2 messages, has_more=false".to_owned()));
        assert!(report.lines.contains(&"  3 send: confirmed as srv-1".to_owned()));
        let timeline = show_block(&report, "  5 show:");
        assert_eq!(timeline[0], "  5 show: c1, 3 messages, 1 unread");
        let echoes = timeline
            .iter()
            .filter(|line| line.contains("how are you?"))
            .count();
        assert_eq!(echoes, 1);
    }

    #[tokio::test]
    async fn failed_edit_is_reported_and_rolled_back() {
        let script = script(
            r#"
[[steps]]
action = "open"
conversation_id = "c1"

[[steps]]
action = "load_older"
conversation_id = "c1"

[[steps]]
action = "fail_next"
operation = "edit_message"

[[steps]]
action = "edit"
conversation_id = "c1"
message_id = "m2"
text = "hey"

[[steps]]
action = "show"
conversation_id = "c1"
"#,
        );

        let report = run_replay(script, &SyncConfig::default()).await;

        assert_eq!(report.failed_steps, 1);
        assert!(report.lines.contains(&"  4 edit: error API_UNAVAILABLE".to_owned()));
        assert!(report
            .lines
            .iter()
            .any(|line| line.starts_with("    ! rolled back in c1")));
        assert!(report.lines.iter().any(|line| line.ends_with("you: hi")));
    }

    #[tokio::test]
    async fn summaries_follow_refresh_and_mark_read() {
        let script = script(
            r#"
[[steps]]
action = "refresh"

[[steps]]
action = "open"
conversation_id = "c1"

[[steps]]
action = "load_older"
conversation_id = "c1"

[[steps]]
action = "mark_read"
conversation_id = "c1"
"#,
        );

        let report = run_replay(script, &SyncConfig::default()).await;

        assert!(report.lines.contains(&"  1 refresh: 1 conversations".to_owned()));
        assert!(report.lines.contains(&"  4 mark_read: 0 unread".to_owned()));
        let summary = report.lines.last().expect("summary line");
        assert!(summary.starts_with("  alice [0] hi"), "{summary}");
    }

    #[test]
    fn render_marks_unread_run_and_sender_names() {
        use crate::{
            domain::grouping::PresentationHints,
            test_support::{message, viewer},
        };

        let entries = vec![
            TimelineEntry {
                message: message("m1", "alice", "hello", 1_000),
                hints: PresentationHints {
                    show_avatar: true,
                    timestamp_divider: Some(TimestampDivider::Day("1 Jan 1970".to_owned())),
                    first_unread_divider: true,
                },
                reply_to: None,
            },
            TimelineEntry {
                message: message("m2", "me", "hi", 2_000),
                hints: PresentationHints {
                    show_avatar: true,
                    timestamp_divider: None,
                    first_unread_divider: false,
                },
                reply_to: None,
            },
        ];

        assert_eq!(
            render_timeline(&entries, &viewer()),
            vec![
                "    ---- 1 Jan 1970 ----".to_owned(),
                "    ---- unread ----".to_owned(),
                "  * alice: hello".to_owned(),
                "  * you: hi".to_owned(),
            ]
        );
    }

    #[test]
    fn render_quotes_cached_reply_targets() {
        use crate::{
            domain::grouping::PresentationHints,
            test_support::{message, viewer},
        };

        let hints = PresentationHints {
            show_avatar: false,
            timestamp_divider: None,
            first_unread_divider: false,
        };
        let mut answer = message("m2", "me", "sure", 2_000);
        answer.reply_to = Some(MessageId::server("m1"));
        let mut orphan = message("m3", "me", "and this", 3_000);
        orphan.reply_to = Some(MessageId::server("m0"));
        let entries = vec![
            TimelineEntry {
                message: answer,
                hints: hints.clone(),
                reply_to: Some(message("m1", "alice", "coffee?", 1_000)),
            },
            TimelineEntry {
                message: orphan,
                hints,
                reply_to: None,
            },
        ];

        assert_eq!(
            render_timeline(&entries, &viewer()),
            vec![
                "    you: sure [re alice: coffee?]".to_owned(),
                "    you: and this [re m0]".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn transport_steps_travel_through_subscriptions() {
        let script = script(
            r#"
[[steps]]
action = "open"
conversation_id = "c1"

[[steps]]
action = "disconnect"
conversation_id = "c1"

[[steps]]
action = "reconnect"
conversation_id = "c1"

[[steps]]
action = "typing"
conversation_id = "c1"
user_id = "alice"

[[steps]]
action = "user"
[steps.event]
kind = "conversation_upserted"
[steps.event.conversation]
id = "c2"
kind = "group"
title = "Team"
participants = ["me", "alice", "bob"]

[[steps]]
action = "show"
conversation_id = "c1"
"#,
        );

        let report = run_replay(script, &SyncConfig::default()).await;

        assert_eq!(report.failed_steps, 0, "{:#?}", report.lines);
        assert!(report.lines.contains(&"  2 disconnect: c1 offline".to_owned()));
        assert!(report.lines.contains(&"  3 reconnect: 2 messages cached".to_owned()));
        let timeline = show_block(&report, "  6 show:");
        assert_eq!(timeline[0], "  6 show: c1, 2 messages, 1 unread");
        assert_eq!(timeline.last(), Some(&"    alice typing…"));
        assert!(report.lines.iter().any(|line| line.starts_with("  Team [0]")));
    }

    #[tokio::test]
    async fn realtime_event_for_unopened_conversation_is_dropped() {
        let script = script(
            r#"
[[steps]]
action = "realtime"
[steps.event]
channel = "c1"
committed_at_ms = 1771059600000
kind = "insert"
[steps.event.row]
id = "m9"
conversation_id = "c1"
sender_id = "alice"
content = "late"
created_at_ms = 1771059600000
"#,
        );

        let report = run_replay(script, &SyncConfig::default()).await;

        assert!(report.lines.contains(&"  1 realtime: insert no change".to_owned()));
    }
}

//! List-level state derived from cached messages: preview, relative time
//! label and unread count.

use chrono::{Local, TimeZone};
use unicode_width::UnicodeWidthChar;

use super::{
    conversation::{Conversation, ConversationSummary},
    ids::UserId,
    message::Message,
    timeline::ConversationTimeline,
};

pub const EMPTY_PREVIEW: &str = "No messages yet";
const ELLIPSIS: char = '…';

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

pub fn summarize(
    conversation: &Conversation,
    timeline: Option<&ConversationTimeline>,
    viewer: &UserId,
    now_ms: i64,
    preview_width: usize,
) -> ConversationSummary {
    let read_state = conversation.read_state(viewer);
    let cached = timeline.filter(|timeline| !timeline.is_empty());

    let (last_message, unread) = match cached {
        Some(timeline) => {
            let last_read_at = read_state.and_then(|state| state.last_read_at_ms);
            (
                timeline.latest(),
                unread_count(timeline.iter(), viewer, last_read_at),
            )
        }
        None => (
            conversation.last_message.as_ref(),
            read_state.map(|state| state.unread_count).unwrap_or(0),
        ),
    };

    ConversationSummary {
        conversation_id: conversation.id.clone(),
        kind: conversation.kind,
        title: conversation_title(conversation, viewer),
        preview: preview_text(last_message, preview_width),
        last_activity_label: last_message
            .map(|message| relative_time_label(message.created_at_ms, now_ms)),
        last_message_at_ms: last_message.map(|message| message.created_at_ms),
        unread_count: unread,
    }
}

/// Messages sent by someone else after the viewer's read position that the
/// viewer has no receipt for.
pub fn unread_count<'a>(
    messages: impl Iterator<Item = &'a Message>,
    viewer: &UserId,
    last_read_at_ms: Option<i64>,
) -> u32 {
    let count = messages
        .filter(|message| &message.sender_id != viewer)
        .filter(|message| last_read_at_ms.map_or(true, |read_at| message.created_at_ms > read_at))
        .filter(|message| !message.is_read_by(viewer))
        .count();

    u32::try_from(count).unwrap_or(u32::MAX)
}

pub fn preview_text(message: Option<&Message>, max_width: usize) -> String {
    let Some(message) = message else {
        return EMPTY_PREVIEW.to_owned();
    };

    let content = message.display_content();
    let flattened = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.is_empty() {
        return EMPTY_PREVIEW.to_owned();
    }

    truncate_to_width(&flattened, max_width)
}

fn truncate_to_width(text: &str, max_width: usize) -> String {
    let total: usize = text.chars().map(|ch| ch.width().unwrap_or(0)).sum();
    if total <= max_width {
        return text.to_owned();
    }

    let budget = max_width.saturating_sub(1);
    let mut used = 0;
    let mut truncated = String::new();
    for ch in text.chars() {
        let width = ch.width().unwrap_or(0);
        if used + width > budget {
            break;
        }
        used += width;
        truncated.push(ch);
    }

    let mut truncated = truncated.trim_end().to_owned();
    truncated.push(ELLIPSIS);
    truncated
}

pub fn relative_time_label(at_ms: i64, now_ms: i64) -> String {
    let elapsed = now_ms.saturating_sub(at_ms).max(0);

    match elapsed {
        e if e < MINUTE_MS => "now".to_owned(),
        e if e < HOUR_MS => format!("{}m", e / MINUTE_MS),
        e if e < DAY_MS => format!("{}h", e / HOUR_MS),
        e if e < 2 * DAY_MS => "yesterday".to_owned(),
        e if e < 7 * DAY_MS => format!("{}d", e / DAY_MS),
        _ => format_date(at_ms),
    }
}

fn format_date(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(dt) => dt.format("%-d %b %Y").to_string(),
        chrono::LocalResult::Ambiguous(dt, _) => dt.format("%-d %b %Y").to_string(),
        chrono::LocalResult::None => "??".to_owned(),
    }
}

fn conversation_title(conversation: &Conversation, viewer: &UserId) -> String {
    if let Some(title) = conversation.title.as_deref().filter(|t| !t.trim().is_empty()) {
        return title.to_owned();
    }

    let others = conversation
        .participants
        .iter()
        .filter(|participant| *participant != viewer)
        .map(UserId::as_str)
        .collect::<Vec<_>>();

    if others.is_empty() {
        conversation.id.to_string()
    } else {
        others.join(", ")
    }
}

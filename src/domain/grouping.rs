//! Presentation hints for a message list.
//!
//! Derives, per message:
//! - whether the sender avatar is shown (last message of a same-sender run)
//! - timestamp dividers on a day change or after a long gap
//! - the single "first unread" divider

use chrono::{Local, NaiveDate, TimeZone};

use super::{ids::UserId, message::Message};

/// Gap after which a timestamp divider is inserted even within one day.
pub const DIVIDER_GAP_MS: i64 = 5 * 60 * 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampDivider {
    /// First message of a calendar day (e.g. "14 Feb 2026").
    Day(String),
    /// Same day, but a long pause since the previous message (e.g. "10:05").
    Time(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresentationHints {
    pub show_avatar: bool,
    pub timestamp_divider: Option<TimestampDivider>,
    pub first_unread_divider: bool,
}

/// Read position of the viewer, used to place the unread divider.
#[derive(Debug, Clone, Copy)]
pub struct ReadMarker<'a> {
    pub viewer: &'a UserId,
    pub last_read_at_ms: Option<i64>,
}

impl ReadMarker<'_> {
    pub fn is_unread(&self, message: &Message) -> bool {
        &message.sender_id != self.viewer
            && self
                .last_read_at_ms
                .map_or(true, |read_at| message.created_at_ms > read_at)
            && !message.is_read_by(self.viewer)
    }
}

/// Hints for one message given its neighbours.
pub fn hints_for(
    previous: Option<&Message>,
    current: &Message,
    next: Option<&Message>,
    marker: ReadMarker<'_>,
) -> PresentationHints {
    PresentationHints {
        show_avatar: ends_sender_run(current, next),
        timestamp_divider: timestamp_divider(previous, current),
        first_unread_divider: starts_unread_run(previous, current, marker),
    }
}

/// Hints for a whole ordered list. Exactly one message at most carries the
/// unread divider, however often the list is recomputed.
pub fn build_hints(messages: &[Message], marker: ReadMarker<'_>) -> Vec<PresentationHints> {
    let first_unread = first_unread_index(messages, marker);

    messages
        .iter()
        .enumerate()
        .map(|(index, current)| {
            let previous = index.checked_sub(1).and_then(|i| messages.get(i));
            let next = messages.get(index + 1);
            let mut hints = hints_for(previous, current, next, marker);
            hints.first_unread_divider = first_unread == Some(index);
            hints
        })
        .collect()
}

pub fn first_unread_index(messages: &[Message], marker: ReadMarker<'_>) -> Option<usize> {
    messages.iter().enumerate().position(|(index, current)| {
        let previous = index.checked_sub(1).and_then(|i| messages.get(i));
        starts_unread_run(previous, current, marker)
    })
}

fn starts_unread_run(previous: Option<&Message>, current: &Message, marker: ReadMarker<'_>) -> bool {
    marker.is_unread(current) && previous.map_or(true, |previous| !marker.is_unread(previous))
}

fn ends_sender_run(current: &Message, next: Option<&Message>) -> bool {
    match next {
        None => true,
        Some(next) => {
            next.sender_id != current.sender_id
                || local_date(next.created_at_ms) != local_date(current.created_at_ms)
        }
    }
}

fn timestamp_divider(previous: Option<&Message>, current: &Message) -> Option<TimestampDivider> {
    let current_date = local_date(current.created_at_ms);

    let Some(previous) = previous else {
        return Some(TimestampDivider::Day(format_date(current_date)));
    };

    if local_date(previous.created_at_ms) != current_date {
        return Some(TimestampDivider::Day(format_date(current_date)));
    }

    if current.created_at_ms - previous.created_at_ms > DIVIDER_GAP_MS {
        return Some(TimestampDivider::Time(format_time(current.created_at_ms)));
    }

    None
}

fn local_date(timestamp_ms: i64) -> NaiveDate {
    match Local.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(dt) => dt.date_naive(),
        chrono::LocalResult::Ambiguous(dt, _) => dt.date_naive(),
        chrono::LocalResult::None => Local::now().date_naive(),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%-d %b %Y").to_string()
}

fn format_time(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M").to_string(),
        chrono::LocalResult::Ambiguous(dt, _) => dt.format("%H:%M").to_string(),
        chrono::LocalResult::None => "??:??".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::message;

    // Midday UTC keeps both timestamps on one local calendar day for any
    // timezone within ±11h.
    const FEB_14_2026_NOON: i64 = 1_771_066_800_000;
    const FEB_15_2026_NOON: i64 = FEB_14_2026_NOON + 24 * 60 * 60 * 1_000;
    const MINUTE: i64 = 60_000;

    fn me() -> UserId {
        UserId::new("me")
    }

    fn marker(read_at: Option<i64>) -> ReadMarker<'static> {
        static ME: std::sync::OnceLock<UserId> = std::sync::OnceLock::new();
        ReadMarker {
            viewer: ME.get_or_init(me),
            last_read_at_ms: read_at,
        }
    }

    #[test]
    fn avatar_only_on_last_message_of_sender_run() {
        let messages = vec![
            message("m1", "alice", "a", FEB_14_2026_NOON),
            message("m2", "alice", "b", FEB_14_2026_NOON + MINUTE),
            message("m3", "bob", "c", FEB_14_2026_NOON + 2 * MINUTE),
        ];

        let hints = build_hints(&messages, marker(Some(i64::MAX)));

        let avatars: Vec<bool> = hints.iter().map(|h| h.show_avatar).collect();
        assert_eq!(avatars, vec![false, true, true]);
    }

    #[test]
    fn first_message_gets_day_divider() {
        let messages = vec![message("m1", "alice", "a", FEB_14_2026_NOON)];

        let hints = build_hints(&messages, marker(None));

        assert_eq!(
            hints[0].timestamp_divider,
            Some(TimestampDivider::Day("14 Feb 2026".to_owned()))
        );
    }

    #[test]
    fn day_change_inserts_divider_and_ends_avatar_run() {
        let messages = vec![
            message("m1", "alice", "day 1", FEB_14_2026_NOON),
            message("m2", "alice", "day 2", FEB_15_2026_NOON),
        ];

        let hints = build_hints(&messages, marker(Some(i64::MAX)));

        assert!(hints[0].show_avatar);
        assert_eq!(
            hints[1].timestamp_divider,
            Some(TimestampDivider::Day("15 Feb 2026".to_owned()))
        );
    }

    #[test]
    fn gap_over_five_minutes_inserts_time_divider() {
        let messages = vec![
            message("m1", "alice", "a", FEB_14_2026_NOON),
            message("m2", "alice", "b", FEB_14_2026_NOON + 5 * MINUTE),
            message("m3", "alice", "c", FEB_14_2026_NOON + 11 * MINUTE),
        ];

        let hints = build_hints(&messages, marker(Some(i64::MAX)));

        assert_eq!(hints[1].timestamp_divider, None);
        assert!(matches!(
            hints[2].timestamp_divider,
            Some(TimestampDivider::Time(_))
        ));
    }

    #[test]
    fn unread_divider_is_placed_once_before_first_unread() {
        let messages = vec![
            message("m1", "alice", "read", FEB_14_2026_NOON),
            message("m2", "alice", "unread 1", FEB_14_2026_NOON + MINUTE),
            message("m3", "me", "my reply", FEB_14_2026_NOON + 2 * MINUTE),
            message("m4", "alice", "unread 2", FEB_14_2026_NOON + 3 * MINUTE),
        ];

        let hints = build_hints(&messages, marker(Some(FEB_14_2026_NOON)));

        let dividers: Vec<bool> = hints.iter().map(|h| h.first_unread_divider).collect();
        assert_eq!(dividers, vec![false, true, false, false]);
    }

    #[test]
    fn unread_divider_is_stable_across_recomputation() {
        let messages = vec![
            message("m1", "alice", "a", FEB_14_2026_NOON),
            message("m2", "alice", "b", FEB_14_2026_NOON + MINUTE),
        ];

        let first = build_hints(&messages, marker(None));
        let second = build_hints(&messages, marker(None));

        assert_eq!(first, second);
        assert_eq!(first.iter().filter(|h| h.first_unread_divider).count(), 1);
        assert!(first[0].first_unread_divider);
    }

    #[test]
    fn no_unread_divider_when_everything_is_read() {
        let messages = vec![message("m1", "alice", "a", FEB_14_2026_NOON)];

        assert_eq!(first_unread_index(&messages, marker(Some(FEB_14_2026_NOON))), None);
    }
}

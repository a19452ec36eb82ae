use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, MessageId, UserId};

/// Content shown in place of a soft-deleted message.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Type of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Voice,
    Document,
    #[default]
    Other,
}

impl MediaKind {
    pub fn display_label(self) -> &'static str {
        match self {
            MediaKind::Photo => "[Photo]",
            MediaKind::Video => "[Video]",
            MediaKind::Voice => "[Voice]",
            MediaKind::Document => "[Document]",
            MediaKind::Other => "[Media]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(default)]
    pub kind: MediaKind,
    pub url: String,
}

/// Denormalized sender profile. Realtime rows never carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DeliveryStatus {
    Pending,
    #[default]
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender: Option<SenderProfile>,
    pub content: Option<String>,
    pub media: Vec<MediaRef>,
    pub reply_to: Option<MessageId>,
    pub created_at_ms: i64,
    pub edited_at_ms: Option<i64>,
    pub deleted_at_ms: Option<i64>,
    /// Sorted by user, at most one receipt per user.
    pub read_receipts: Vec<ReadReceipt>,
    pub status: DeliveryStatus,
}

impl Message {
    pub fn is_edited(&self) -> bool {
        self.edited_at_ms.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at_ms.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    /// Latest point in time this entry was written at.
    pub fn revision(&self) -> i64 {
        self.created_at_ms
            .max(self.edited_at_ms.unwrap_or(i64::MIN))
            .max(self.deleted_at_ms.unwrap_or(i64::MIN))
    }

    /// Total order used to pick a winner between two versions of the same message.
    fn precedence(&self) -> (i64, bool, Option<&str>) {
        (self.revision(), self.is_deleted(), self.content.as_deref())
    }

    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.read_receipts
            .iter()
            .any(|receipt| &receipt.user_id == user_id)
    }

    /// Returns the display content: media label + text, or the delete placeholder.
    pub fn display_content(&self) -> String {
        if self.is_deleted() {
            return DELETED_PLACEHOLDER.to_owned();
        }

        let text = self.content.as_deref().unwrap_or_default();
        match (self.media.first(), text.is_empty()) {
            (Some(media), true) => media.kind.display_label().to_owned(),
            (Some(media), false) => format!("{} {}", media.kind.display_label(), text),
            (None, _) => text.to_owned(),
        }
    }

    /// Resolves two versions of the same message into one, independent of
    /// which side is resident and which is arriving.
    pub fn merged_with(&self, incoming: &Message) -> Message {
        let (mut winner, loser) = if incoming.precedence() > self.precedence() {
            (incoming.clone(), self)
        } else {
            (self.clone(), incoming)
        };

        winner.absorb(loser);
        winner
    }

    /// Builds the candidate version produced by applying `patch` on top of `self`.
    pub fn patched(&self, patch: &MessagePatch) -> Message {
        let mut candidate = self.clone();

        if let Some(content) = &patch.content {
            candidate.content = content.clone();
        }
        if let Some(edited_at) = patch.edited_at_ms {
            candidate.edited_at_ms = edited_at;
        }
        if let Some(deleted_at) = patch.deleted_at_ms {
            candidate.deleted_at_ms = deleted_at;
        }
        if let Some(media) = &patch.media {
            candidate.media = media.clone();
        }
        if let Some(sender) = &patch.sender {
            candidate.sender = Some(sender.clone());
        }
        for receipt in &patch.read_receipts {
            candidate.add_receipt(receipt.clone());
        }

        candidate
    }

    pub fn add_receipt(&mut self, receipt: ReadReceipt) {
        match self
            .read_receipts
            .binary_search_by(|existing| existing.user_id.cmp(&receipt.user_id))
        {
            Ok(index) => {
                let existing = &mut self.read_receipts[index];
                existing.read_at_ms = existing.read_at_ms.min(receipt.read_at_ms);
            }
            Err(index) => self.read_receipts.insert(index, receipt),
        }
    }

    /// Fills empty relations and receipts from another version of this message.
    ///
    /// Edit and delete marks are joined by maximum, so a deletion seen on
    /// either side survives and the result does not depend on which version
    /// won the precedence comparison.
    pub fn absorb(&mut self, other: &Message) {
        self.edited_at_ms = self.edited_at_ms.max(other.edited_at_ms);
        let deleted_at_ms = self.deleted_at_ms.max(other.deleted_at_ms);
        if deleted_at_ms.is_some() && !self.is_deleted() {
            self.content = Some(DELETED_PLACEHOLDER.to_owned());
            self.media.clear();
        }
        self.deleted_at_ms = deleted_at_ms;

        if self.sender.is_none() {
            self.sender = other.sender.clone();
        }
        if self.media.is_empty() && !self.is_deleted() {
            self.media = other.media.clone();
        }
        if self.reply_to.is_none() {
            self.reply_to = other.reply_to.clone();
        }
        for receipt in &other.read_receipts {
            self.add_receipt(receipt.clone());
        }
        self.status = self.status.max(other.status);
    }
}

/// Partial change to a cached message. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePatch {
    pub content: Option<Option<String>>,
    pub edited_at_ms: Option<Option<i64>>,
    pub deleted_at_ms: Option<Option<i64>>,
    pub media: Option<Vec<MediaRef>>,
    pub sender: Option<SenderProfile>,
    pub read_receipts: Vec<ReadReceipt>,
}

impl MessagePatch {
    pub fn edit(content: impl Into<String>, edited_at_ms: i64) -> Self {
        Self {
            content: Some(Some(content.into())),
            edited_at_ms: Some(Some(edited_at_ms)),
            ..Self::default()
        }
    }

    /// Soft delete: keeps the record and its position, drops content and media.
    pub fn soft_delete(deleted_at_ms: i64) -> Self {
        Self {
            content: Some(Some(DELETED_PLACEHOLDER.to_owned())),
            deleted_at_ms: Some(Some(deleted_at_ms)),
            media: Some(Vec::new()),
            ..Self::default()
        }
    }

    pub fn receipts(read_receipts: Vec<ReadReceipt>) -> Self {
        Self {
            read_receipts,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::message;

    fn profile(name: &str) -> SenderProfile {
        SenderProfile {
            display_name: name.to_owned(),
            avatar_url: None,
        }
    }

    #[test]
    fn display_content_returns_text_only_when_no_media() {
        let msg = message("m1", "alice", "Hello world", 1_000);

        assert_eq!(msg.display_content(), "Hello world");
    }

    #[test]
    fn display_content_combines_media_label_and_text() {
        let mut msg = message("m1", "alice", "Check this out", 1_000);
        msg.media.push(MediaRef {
            kind: MediaKind::Photo,
            url: "https://cdn/p.jpg".to_owned(),
        });

        assert_eq!(msg.display_content(), "[Photo] Check this out");

        msg.content = None;
        assert_eq!(msg.display_content(), "[Photo]");
    }

    #[test]
    fn display_content_uses_placeholder_once_deleted() {
        let msg = message("m1", "alice", "secret", 1_000).patched(&MessagePatch::soft_delete(2_000));

        assert!(msg.is_deleted());
        assert_eq!(msg.display_content(), DELETED_PLACEHOLDER);
    }

    #[test]
    fn newer_edit_wins_regardless_of_side() {
        let original = message("m1", "alice", "v1", 1_000);
        let edited = original.patched(&MessagePatch::edit("v2", 5_000));

        assert_eq!(original.merged_with(&edited).content.as_deref(), Some("v2"));
        assert_eq!(edited.merged_with(&original).content.as_deref(), Some("v2"));
    }

    #[test]
    fn delete_beats_older_edit_in_any_order() {
        let base = message("m1", "alice", "v1", 1_000);
        let edited = base.patched(&MessagePatch::edit("v2", 2_000));
        let deleted = base.patched(&MessagePatch::soft_delete(3_000));

        let a = edited.merged_with(&deleted);
        let b = deleted.merged_with(&edited);

        assert_eq!(a, b);
        assert!(a.is_deleted());
    }

    #[test]
    fn merge_never_clears_populated_relations() {
        let mut enriched = message("m1", "alice", "hi", 1_000);
        enriched.sender = Some(profile("Alice"));
        enriched.media.push(MediaRef {
            kind: MediaKind::Voice,
            url: "https://cdn/v.ogg".to_owned(),
        });
        let bare = message("m1", "alice", "hi", 1_000);

        let merged = enriched.merged_with(&bare);
        assert_eq!(merged.sender, Some(profile("Alice")));
        assert_eq!(merged.media.len(), 1);

        let merged = bare.merged_with(&enriched);
        assert_eq!(merged.sender, Some(profile("Alice")));
        assert_eq!(merged.media.len(), 1);
    }

    #[test]
    fn merge_keeps_edit_mark_from_a_losing_version() {
        let base = message("m1", "alice", "hi", 1_000);
        let edited = base.patched(&MessagePatch::edit("hi again", 2_000));
        let deleted = base.patched(&MessagePatch::soft_delete(3_000));

        let forward = edited.merged_with(&deleted);
        let backward = deleted.merged_with(&edited);

        assert_eq!(forward, backward);
        assert_eq!(forward.edited_at_ms, Some(2_000));
        assert_eq!(forward.deleted_at_ms, Some(3_000));
        assert_eq!(forward.content.as_deref(), Some(DELETED_PLACEHOLDER));
    }

    #[test]
    fn deletion_survives_a_later_edit_from_another_source() {
        let base = message("m1", "alice", "hi", 1_000);
        let deleted = base.patched(&MessagePatch::soft_delete(2_000));
        let edited = base.patched(&MessagePatch::edit("late edit", 3_000));

        let merged = deleted.merged_with(&edited);

        assert!(merged.is_deleted());
        assert_eq!(merged, edited.merged_with(&deleted));
        assert_eq!(merged.display_content(), DELETED_PLACEHOLDER);
    }

    #[test]
    fn receipts_keep_one_entry_per_user_with_earliest_time() {
        let mut msg = message("m1", "alice", "hi", 1_000);
        let receipt = |user: &str, at| ReadReceipt {
            message_id: msg_id("m1"),
            user_id: UserId::new(user),
            read_at_ms: at,
        };

        msg.add_receipt(receipt("carol", 5_000));
        msg.add_receipt(receipt("bob", 4_000));
        msg.add_receipt(receipt("carol", 3_000));

        assert_eq!(msg.read_receipts.len(), 2);
        assert_eq!(msg.read_receipts[0].user_id, UserId::new("bob"));
        assert_eq!(msg.read_receipts[1].read_at_ms, 3_000);
    }

    fn msg_id(raw: &str) -> MessageId {
        MessageId::server(raw)
    }
}

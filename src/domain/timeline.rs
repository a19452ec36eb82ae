//! Ordered, deduplicated message store for a single conversation.
//!
//! Entries are keyed by `(created_at, id)` so insertion keeps the sequence
//! sorted without re-sorting, and a secondary index maps ids to their key.
//! Every merge operation is idempotent and resolves conflicts by recency
//! (see [`Message::merged_with`]), never by the order calls arrive in.
//! Patches for ids the timeline has not seen yet are held back and applied
//! once the message itself arrives.

use std::collections::{BTreeMap, HashMap};

use super::{
    ids::MessageId,
    message::{Message, MessagePatch},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOp {
    Insert(Message),
    Update(MessageId, MessagePatch),
    /// Supersedes a temporary id with the server-confirmed message.
    Replace(MessageId, Message),
    Remove(MessageId),
}

impl MergeOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(..) => "update",
            Self::Replace(..) => "replace",
            Self::Remove(_) => "remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Replaced,
    Removed,
    Unchanged,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    created_at_ms: i64,
    id: MessageId,
}

impl OrderKey {
    fn of(message: &Message) -> Self {
        Self {
            created_at_ms: message.created_at_ms,
            id: message.id.clone(),
        }
    }
}

/// Upper bound on ids with held-back patches per conversation.
const MAX_DEFERRED: usize = 512;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationTimeline {
    entries: BTreeMap<OrderKey, Message>,
    index: HashMap<MessageId, OrderKey>,
    deferred: HashMap<MessageId, Vec<MessagePatch>>,
}

impl ConversationTimeline {
    pub fn merge(&mut self, op: MergeOp) -> MergeOutcome {
        match op {
            MergeOp::Insert(message) => self.insert(message),
            MergeOp::Update(id, patch) => self.update(&id, &patch),
            MergeOp::Replace(temp_id, message) => self.replace(&temp_id, message),
            MergeOp::Remove(id) => self.remove(&id),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).and_then(|key| self.entries.get(key))
    }

    /// Messages in timeline order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.entries.values()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.entries.values().cloned().collect()
    }

    /// Oldest entry that came from the server; pending local messages never
    /// act as a pagination cursor.
    pub fn earliest_confirmed(&self) -> Option<&Message> {
        self.entries.values().find(|message| !message.id.is_temporary())
    }

    pub fn latest(&self) -> Option<&Message> {
        self.entries.values().next_back()
    }

    /// Resolves the reply target of `id` by lookup, if it is cached.
    pub fn reply_target(&self, id: &MessageId) -> Option<&Message> {
        self.get(id)
            .and_then(|message| message.reply_to.as_ref())
            .and_then(|parent| self.get(parent))
    }

    /// Puts `previous` back in place of `applied`, unless a newer write has
    /// replaced `applied` in the meantime.
    pub fn rollback(&mut self, applied: &Message, previous: Option<Message>) -> bool {
        if self.get(&applied.id) != Some(applied) {
            return false;
        }

        self.detach(&applied.id);
        if let Some(previous) = previous {
            self.attach(previous);
        }
        true
    }

    /// Number of ids with patches waiting for their message.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    fn insert(&mut self, message: Message) -> MergeOutcome {
        let Some(existing) = self.get(&message.id) else {
            let id = message.id.clone();
            self.attach(message);
            for patch in self.deferred.remove(&id).unwrap_or_default() {
                self.update(&id, &patch);
            }
            return MergeOutcome::Inserted;
        };

        let merged = existing.merged_with(&message);
        if &merged == existing {
            return MergeOutcome::Unchanged;
        }

        tracing::debug!(
            message_id = %message.id,
            "conflicting versions resolved by recency"
        );
        self.detach(&message.id);
        self.attach(merged);
        MergeOutcome::Updated
    }

    fn update(&mut self, id: &MessageId, patch: &MessagePatch) -> MergeOutcome {
        let Some(existing) = self.get(id) else {
            self.defer(id, patch);
            return MergeOutcome::Unchanged;
        };

        let candidate = existing.patched(patch);
        let merged = existing.merged_with(&candidate);
        if &merged == existing {
            return MergeOutcome::Unchanged;
        }

        self.detach(id);
        self.attach(merged);
        MergeOutcome::Updated
    }

    fn replace(&mut self, temp_id: &MessageId, message: Message) -> MergeOutcome {
        let Some(temp) = self.detach(temp_id) else {
            return self.insert(message);
        };

        // Local relations (attached media, reply target) survive confirmation.
        let mut confirmed = message;
        confirmed.absorb(&temp);

        if self.contains(&confirmed.id) {
            tracing::debug!(
                temp_id = %temp_id,
                message_id = %confirmed.id,
                "server message already present; dropping temporary entry"
            );
        }
        self.insert(confirmed);
        MergeOutcome::Replaced
    }

    fn remove(&mut self, id: &MessageId) -> MergeOutcome {
        self.deferred.remove(id);
        match self.detach(id) {
            Some(_) => MergeOutcome::Removed,
            None => MergeOutcome::Unchanged,
        }
    }

    fn defer(&mut self, id: &MessageId, patch: &MessagePatch) {
        if !self.deferred.contains_key(id) && self.deferred.len() >= MAX_DEFERRED {
            tracing::warn!(
                message_id = %id,
                limit = MAX_DEFERRED,
                "too many patches waiting for unknown messages; dropping patch"
            );
            return;
        }

        tracing::debug!(message_id = %id, "patch for unknown message held until it arrives");
        self.deferred.entry(id.clone()).or_default().push(patch.clone());
    }

    fn attach(&mut self, message: Message) {
        let key = OrderKey::of(&message);
        self.index.insert(message.id.clone(), key.clone());
        self.entries.insert(key, message);
    }

    fn detach(&mut self, id: &MessageId) -> Option<Message> {
        let key = self.index.remove(id)?;
        self.entries.remove(&key)
    }
}

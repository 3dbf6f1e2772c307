//! Authoritative in-memory table of conversations.
//!
//! Keyed by conversation id, ordered by recency for list rendering. Snapshot
//! merges are last-write-wins on `updated_at` so a REST response that raced a
//! faster push event never regresses locally-advanced state.

use std::collections::HashMap;

use murmur_proto::conversation::{
    ConversationId, ConversationKind, ConversationSnapshot, MessagePreview, Participant, UserId,
};
use murmur_proto::message::{MessageSnapshot, Timestamp};

/// A conversation as the engine tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    /// Server-assigned unique identifier.
    pub id: ConversationId,
    /// Direct thread or group.
    pub kind: ConversationKind,
    /// Current membership.
    pub participants: Vec<Participant>,
    /// Authoritative display name (groups; absent for direct threads).
    pub display_name: Option<String>,
    /// Authoritative photo URL (groups).
    pub photo_url: Option<String>,
    /// Preview of the most recent message.
    pub last_message: Option<MessagePreview>,
    /// Locally-tracked unread counter, never negative.
    pub unread_count: u32,
    /// Recency ordering key.
    pub updated_at: Timestamp,
}

impl ConversationEntry {
    fn from_snapshot(snap: ConversationSnapshot) -> Self {
        Self {
            id: snap.id,
            kind: snap.kind,
            participants: snap.participants,
            display_name: snap.display_name,
            photo_url: snap.photo_url,
            last_message: snap.last_message,
            unread_count: snap.unread_count,
            updated_at: snap.updated_at,
        }
    }

    /// The other party of a direct conversation, from `local`'s perspective.
    #[must_use]
    pub fn counterpart(&self, local: &UserId) -> Option<&Participant> {
        match self.kind {
            ConversationKind::Direct => self.participants.iter().find(|p| p.user_id != *local),
            ConversationKind::Group => None,
        }
    }

    /// Display name as `local` should see it: the authoritative group name,
    /// or the other participant's profile name for direct threads.
    #[must_use]
    pub fn display_name_for(&self, local: &UserId) -> &str {
        match self.kind {
            ConversationKind::Group => self.display_name.as_deref().unwrap_or("Group"),
            ConversationKind::Direct => self
                .counterpart(local)
                .map_or("Conversation", |p| p.display_name.as_str()),
        }
    }

    /// Photo URL as `local` should see it (same derivation as the name).
    #[must_use]
    pub fn photo_url_for(&self, local: &UserId) -> Option<&str> {
        match self.kind {
            ConversationKind::Group => self.photo_url.as_deref(),
            ConversationKind::Direct => self
                .counterpart(local)
                .and_then(|p| p.photo_url.as_deref()),
        }
    }

    /// Display name of a participant, falling back to the raw user id.
    #[must_use]
    pub fn participant_name(&self, user: &UserId) -> String {
        self.participants
            .iter()
            .find(|p| p.user_id == *user)
            .map_or_else(|| user.as_str().to_string(), |p| p.display_name.clone())
    }
}

/// The authoritative conversation table.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, ConversationEntry>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a batch of REST snapshots into the store.
    ///
    /// Locally-absent conversations are inserted as-is. For present ones,
    /// membership and identity fields are always refreshed, but the dynamic
    /// fields (preview, ordering key, unread counter) only move forward:
    /// a snapshot older than local state — possible when a push event was
    /// processed after the REST request was issued — leaves them untouched.
    ///
    /// Malformed snapshots (a direct conversation without exactly two
    /// participants) are dropped with a diagnostic.
    ///
    /// Returns the number of snapshots applied.
    pub fn upsert_from_snapshot(
        &mut self,
        snapshots: impl IntoIterator<Item = ConversationSnapshot>,
    ) -> usize {
        let mut applied = 0;
        for snap in snapshots {
            if snap.kind == ConversationKind::Direct && snap.participants.len() != 2 {
                tracing::warn!(
                    conversation = %snap.id,
                    participants = snap.participants.len(),
                    "dropping direct conversation snapshot without exactly two participants"
                );
                continue;
            }
            applied += 1;
            match self.conversations.get_mut(&snap.id) {
                None => {
                    self.conversations
                        .insert(snap.id.clone(), ConversationEntry::from_snapshot(snap));
                }
                Some(entry) => {
                    entry.kind = snap.kind;
                    entry.participants = snap.participants;
                    entry.display_name = snap.display_name;
                    entry.photo_url = snap.photo_url;
                    if snap.updated_at > entry.updated_at {
                        entry.last_message = snap.last_message;
                        entry.unread_count = snap.unread_count;
                        entry.updated_at = snap.updated_at;
                    } else {
                        tracing::debug!(
                            conversation = %snap.id,
                            snapshot = %snap.updated_at,
                            local = %entry.updated_at,
                            "snapshot is not newer than local state, keeping local counters"
                        );
                    }
                }
            }
        }
        applied
    }

    /// Applies an incoming message to the conversation's preview, ordering,
    /// and unread counter.
    ///
    /// The caller decides `count_unread` (sender is not the local user and
    /// the conversation is not suppressed by the active view). An
    /// out-of-order older message never regresses the preview or ordering
    /// key, but still counts toward unread.
    ///
    /// Returns `false` if the conversation is unknown (nothing is mutated).
    pub fn apply_incoming_message(
        &mut self,
        msg: &MessageSnapshot,
        sender_name: &str,
        count_unread: bool,
    ) -> bool {
        let Some(entry) = self.conversations.get_mut(&msg.conversation_id) else {
            tracing::debug!(
                conversation = %msg.conversation_id,
                message = %msg.id,
                "message for unknown conversation"
            );
            return false;
        };

        let newer_than_preview = entry
            .last_message
            .as_ref()
            .is_none_or(|prev| msg.created_at >= prev.created_at);
        if newer_than_preview {
            entry.last_message = Some(MessagePreview {
                content: preview_text(msg),
                sender_name: sender_name.to_string(),
                created_at: msg.created_at,
            });
        }
        entry.updated_at = entry.updated_at.max(msg.created_at);
        if count_unread {
            entry.unread_count = entry.unread_count.saturating_add(1);
        }
        true
    }

    /// Zeroes the unread counter. Idempotent; returns `true` if the counter
    /// actually changed.
    pub fn mark_read(&mut self, id: &ConversationId) -> bool {
        match self.conversations.get_mut(id) {
            Some(entry) if entry.unread_count > 0 => {
                entry.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Restores an unread counter to a previously-observed value.
    ///
    /// Used to roll back an optimistic mark-read whose transport call failed.
    pub fn restore_unread(&mut self, id: &ConversationId, count: u32) {
        if let Some(entry) = self.conversations.get_mut(id) {
            entry.unread_count = count;
        }
    }

    /// Removes a conversation. Safe to call when already absent.
    pub fn remove(&mut self, id: &ConversationId) -> bool {
        self.conversations.remove(id).is_some()
    }

    /// Looks up a conversation by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&ConversationEntry> {
        self.conversations.get(id)
    }

    /// Current unread counter for a conversation.
    #[must_use]
    pub fn unread_count(&self, id: &ConversationId) -> Option<u32> {
        self.conversations.get(id).map(|e| e.unread_count)
    }

    /// Sum of unread counters across all conversations.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.conversations
            .values()
            .map(|e| u64::from(e.unread_count))
            .sum()
    }

    /// All conversations, most recent first.
    ///
    /// Ties on the ordering key break by id ascending so iteration order is
    /// deterministic.
    #[must_use]
    pub fn ordered(&self) -> Vec<&ConversationEntry> {
        let mut all: Vec<&ConversationEntry> = self.conversations.values().collect();
        all.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Number of tracked conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

/// Preview text for a message: its body, or a placeholder for media-only
/// messages.
fn preview_text(msg: &MessageSnapshot) -> String {
    match (&msg.content, &msg.media) {
        (Some(text), _) => text.clone(),
        (None, Some(media)) => format!("[{}]", media.kind),
        (None, None) => String::new(),
    }
}

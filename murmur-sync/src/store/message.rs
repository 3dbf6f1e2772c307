//! Per-conversation ordered message lists.
//!
//! Messages are kept sorted by `created_at` ascending (id ascending on ties,
//! so coarse server clocks still produce a reproducible order). Dedup is by
//! id, with one extra rule: a confirmed message whose `client_tag` matches a
//! local pending entry replaces that entry in place instead of appending a
//! duplicate.

use std::collections::HashMap;

use murmur_proto::conversation::{ConversationId, UserId};
use murmur_proto::message::{
    ClientTag, MediaAttachment, MessageDraft, MessageId, MessageSnapshot, Timestamp,
};

/// Client-side delivery status of a message. Not part of any server payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Locally created, awaiting server confirmation.
    Pending,
    /// Confirmed by the server.
    Confirmed,
    /// Transmission failed; kept visible so the user can retry or discard.
    Failed,
}

/// A message as the engine tracks it: the server payload plus client-only
/// delivery status and engagement state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Unique identifier (provisional until confirmation for local sends).
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent the message.
    pub sender_id: UserId,
    /// Text body.
    pub content: Option<String>,
    /// Attached media.
    pub media: Option<MediaAttachment>,
    /// Creation time (client-assigned while pending, server-assigned after).
    pub created_at: Timestamp,
    /// Delivery status.
    pub status: MessageStatus,
    /// Correlation token for local sends, carried until confirmation.
    pub client_tag: Option<ClientTag>,
    /// Like counter, optimistically maintained.
    pub likes_count: u32,
    /// Whether the local user has liked this message.
    pub is_liked: bool,
    /// Share counter, optimistically maintained.
    pub share_count: u32,
}

impl StoredMessage {
    /// Builds a confirmed entry from a server payload.
    #[must_use]
    pub fn confirmed(snap: MessageSnapshot) -> Self {
        Self {
            id: snap.id,
            conversation_id: snap.conversation_id,
            sender_id: snap.sender_id,
            content: snap.content,
            media: snap.media,
            created_at: snap.created_at,
            status: MessageStatus::Confirmed,
            client_tag: snap.client_tag,
            likes_count: 0,
            is_liked: false,
            share_count: 0,
        }
    }

    /// Builds a pending entry for an optimistic local send.
    ///
    /// The provisional id is derived from the correlation token so it cannot
    /// collide with a server-assigned id.
    #[must_use]
    pub fn pending(
        conversation_id: ConversationId,
        sender_id: UserId,
        draft: MessageDraft,
        tag: ClientTag,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::new(format!("local-{tag}")),
            conversation_id,
            sender_id,
            content: draft.content,
            media: draft.media,
            created_at,
            status: MessageStatus::Pending,
            client_tag: Some(tag),
            likes_count: 0,
            is_liked: false,
            share_count: 0,
        }
    }
}

/// Outcome of [`MessageStore::append_or_merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was appended.
    Inserted,
    /// An existing pending entry was replaced by its confirmation.
    ConfirmedPending,
    /// The message was already present; nothing changed.
    Duplicate,
}

/// Prior engagement state captured before an optimistic like, for rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    /// Like counter before the optimistic update.
    pub likes_count: u32,
    /// Liked flag before the optimistic update.
    pub is_liked: bool,
}

/// Per-conversation ordered message lists, keyed by conversation id.
#[derive(Debug, Default)]
pub struct MessageStore {
    threads: HashMap<ConversationId, Vec<StoredMessage>>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a message, deduplicating redeliveries.
    ///
    /// - Same id already present: redelivery. If the existing entry is
    ///   pending and the incoming one is confirmed, the confirmation wins in
    ///   place; otherwise nothing changes.
    /// - Incoming confirmed message whose `client_tag` matches a local
    ///   pending entry: the echo of our own send — the pending entry is
    ///   replaced in place (its id becomes the server id).
    /// - Otherwise: appended in sorted position.
    pub fn append_or_merge(&mut self, mut incoming: StoredMessage) -> MergeOutcome {
        let thread = self
            .threads
            .entry(incoming.conversation_id.clone())
            .or_default();

        if let Some(existing) = thread.iter_mut().find(|m| m.id == incoming.id) {
            if existing.status == MessageStatus::Confirmed
                || incoming.status != MessageStatus::Confirmed
            {
                tracing::debug!(message = %incoming.id, "duplicate message dropped");
                return MergeOutcome::Duplicate;
            }
            incoming.likes_count = existing.likes_count;
            incoming.is_liked = existing.is_liked;
            incoming.share_count = existing.share_count;
            *existing = incoming;
            Self::resort(thread);
            return MergeOutcome::ConfirmedPending;
        }

        if incoming.status == MessageStatus::Confirmed && incoming.client_tag.is_some() {
            let tag = incoming.client_tag.clone();
            if let Some(pending) = thread
                .iter_mut()
                .find(|m| m.status != MessageStatus::Confirmed && m.client_tag == tag)
            {
                incoming.likes_count = pending.likes_count;
                incoming.is_liked = pending.is_liked;
                incoming.share_count = pending.share_count;
                *pending = incoming;
                Self::resort(thread);
                return MergeOutcome::ConfirmedPending;
            }
        }

        thread.push(incoming);
        Self::resort(thread);
        MergeOutcome::Inserted
    }

    /// Merges one REST page (newest-first, as the server sends it) into a
    /// conversation, preserving local pending/failed entries that have no
    /// server counterpart yet.
    ///
    /// Returns the number of messages that were actually new.
    pub fn load_page(
        &mut self,
        conversation: &ConversationId,
        newest_first: Vec<MessageSnapshot>,
    ) -> usize {
        let mut inserted = 0;
        for snap in newest_first.into_iter().rev() {
            if snap.conversation_id != *conversation {
                tracing::warn!(
                    expected = %conversation,
                    got = %snap.conversation_id,
                    message = %snap.id,
                    "dropping page entry for a different conversation"
                );
                continue;
            }
            if self.append_or_merge(StoredMessage::confirmed(snap)) == MergeOutcome::Inserted {
                inserted += 1;
            }
        }
        inserted
    }

    /// Transitions a pending message to failed. The message stays visible.
    pub fn mark_failed(&mut self, conversation: &ConversationId, id: &MessageId) -> bool {
        match self.entry_mut(conversation, id) {
            Some(msg) if msg.status == MessageStatus::Pending => {
                msg.status = MessageStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Transitions a failed message back to pending for a retry attempt.
    ///
    /// Returns a clone of the entry so the caller can re-transmit it with the
    /// original correlation token.
    pub fn mark_pending(
        &mut self,
        conversation: &ConversationId,
        id: &MessageId,
    ) -> Option<StoredMessage> {
        match self.entry_mut(conversation, id) {
            Some(msg) if msg.status == MessageStatus::Failed => {
                msg.status = MessageStatus::Pending;
                Some(msg.clone())
            }
            _ => None,
        }
    }

    /// Removes a failed message the user chose to discard.
    ///
    /// Only failed entries can be discarded; confirmed history is immutable
    /// except through explicit deletion events.
    pub fn discard_failed(&mut self, conversation: &ConversationId, id: &MessageId) -> bool {
        let Some(thread) = self.threads.get_mut(conversation) else {
            return false;
        };
        let before = thread.len();
        thread.retain(|m| !(m.id == *id && m.status == MessageStatus::Failed));
        thread.len() != before
    }

    /// Drops an entire conversation's messages (explicit deletion only).
    pub fn remove_conversation(&mut self, conversation: &ConversationId) -> bool {
        self.threads.remove(conversation).is_some()
    }

    /// Messages of a conversation in rendering order (`created_at` asc).
    #[must_use]
    pub fn messages(&self, conversation: &ConversationId) -> &[StoredMessage] {
        self.threads
            .get(conversation)
            .map_or(&[], Vec::as_slice)
    }

    /// Looks up a single message.
    #[must_use]
    pub fn get(&self, conversation: &ConversationId, id: &MessageId) -> Option<&StoredMessage> {
        self.threads
            .get(conversation)?
            .iter()
            .find(|m| m.id == *id)
    }

    /// Oldest known message timestamp in a conversation, for pagination.
    #[must_use]
    pub fn oldest_timestamp(&self, conversation: &ConversationId) -> Option<Timestamp> {
        self.threads
            .get(conversation)?
            .first()
            .map(|m| m.created_at)
    }

    /// Applies an optimistic like/unlike, returning the prior state for
    /// rollback. `None` if the message is unknown.
    pub fn apply_like(
        &mut self,
        conversation: &ConversationId,
        id: &MessageId,
        liked: bool,
    ) -> Option<LikeState> {
        let msg = self.entry_mut(conversation, id)?;
        let prior = LikeState {
            likes_count: msg.likes_count,
            is_liked: msg.is_liked,
        };
        if liked && !msg.is_liked {
            msg.likes_count = msg.likes_count.saturating_add(1);
        } else if !liked && msg.is_liked {
            msg.likes_count = msg.likes_count.saturating_sub(1);
        }
        msg.is_liked = liked;
        Some(prior)
    }

    /// Restores like state captured before a failed optimistic like.
    pub fn restore_like(&mut self, conversation: &ConversationId, id: &MessageId, prior: LikeState) {
        if let Some(msg) = self.entry_mut(conversation, id) {
            msg.likes_count = prior.likes_count;
            msg.is_liked = prior.is_liked;
        }
    }

    /// Applies an optimistic share, returning the prior counter for rollback.
    pub fn apply_share(&mut self, conversation: &ConversationId, id: &MessageId) -> Option<u32> {
        let msg = self.entry_mut(conversation, id)?;
        let prior = msg.share_count;
        msg.share_count = msg.share_count.saturating_add(1);
        Some(prior)
    }

    /// Restores a share counter captured before a failed optimistic share.
    pub fn restore_share(&mut self, conversation: &ConversationId, id: &MessageId, prior: u32) {
        if let Some(msg) = self.entry_mut(conversation, id) {
            msg.share_count = prior;
        }
    }

    fn entry_mut(
        &mut self,
        conversation: &ConversationId,
        id: &MessageId,
    ) -> Option<&mut StoredMessage> {
        self.threads
            .get_mut(conversation)?
            .iter_mut()
            .find(|m| m.id == *id)
    }

    fn resort(thread: &mut [StoredMessage]) {
        thread.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}

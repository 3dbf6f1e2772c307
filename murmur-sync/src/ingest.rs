//! Reconciliation and dedup: the single mutation path into the stores.
//!
//! Both freshly-fetched REST data and push events funnel through
//! [`Reconciler`], so there is exactly one code path that can mutate store
//! state — no races between "REST response arrived" and "push event arrived"
//! handlers. Malformed or stale input is dropped with a diagnostic; a bad
//! event must never take down the conversation view.

use std::collections::HashSet;

use murmur_proto::conversation::{ConversationId, ConversationSnapshot, UserId};
use murmur_proto::event::PushEvent;
use murmur_proto::message::{MessageSnapshot, Timestamp};

use crate::config::UnreadPolicy;
use crate::engine::SyncEvent;
use crate::store::{ConversationStore, MergeOutcome, MessageStore, StoredMessage};
use crate::typing::TypingTracker;

/// Which conversations are currently on screen.
///
/// `active` is the conversation rendered in the detail view; `visible` covers
/// additional panes in split layouts. Which of them suppress unread counting
/// is decided by [`UnreadPolicy`].
#[derive(Debug, Default, Clone)]
pub struct ViewState {
    active: Option<ConversationId>,
    visible: HashSet<ConversationId>,
}

impl ViewState {
    /// The conversation open in the detail view.
    #[must_use]
    pub const fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Sets the detail-view conversation, returning the previous one.
    pub fn set_active(&mut self, conversation: Option<ConversationId>) -> Option<ConversationId> {
        std::mem::replace(&mut self.active, conversation)
    }

    /// Replaces the set of additionally-visible panes.
    pub fn set_visible(&mut self, conversations: HashSet<ConversationId>) {
        self.visible = conversations;
    }

    /// Whether a conversation is visible in any pane (including the detail
    /// view).
    #[must_use]
    pub fn is_visible(&self, conversation: &ConversationId) -> bool {
        self.active.as_ref() == Some(conversation) || self.visible.contains(conversation)
    }
}

/// Merges REST snapshots and push events into the stores.
pub struct Reconciler {
    local_user: UserId,
    policy: UnreadPolicy,
    view: ViewState,
    conversations: ConversationStore,
    messages: MessageStore,
    typing: TypingTracker,
}

impl Reconciler {
    /// Creates a reconciler for the given local user.
    #[must_use]
    pub fn new(local_user: UserId, policy: UnreadPolicy, typing: TypingTracker) -> Self {
        Self {
            local_user,
            policy,
            view: ViewState::default(),
            conversations: ConversationStore::new(),
            messages: MessageStore::new(),
            typing,
        }
    }

    /// The local user this reconciler filters self-events against.
    #[must_use]
    pub const fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Read access to the conversation table.
    #[must_use]
    pub const fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Read access to the message lists.
    #[must_use]
    pub const fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Read access to the typing tracker.
    #[must_use]
    pub const fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// Read access to the view state.
    #[must_use]
    pub const fn view(&self) -> &ViewState {
        &self.view
    }

    pub(crate) const fn conversations_mut(&mut self) -> &mut ConversationStore {
        &mut self.conversations
    }

    pub(crate) const fn messages_mut(&mut self) -> &mut MessageStore {
        &mut self.messages
    }

    /// Changes the detail-view conversation, returning the previous one.
    pub fn set_active(&mut self, conversation: Option<ConversationId>) -> Option<ConversationId> {
        self.view.set_active(conversation)
    }

    /// Replaces the set of additionally-visible panes.
    pub fn set_visible(&mut self, conversations: HashSet<ConversationId>) {
        self.view.set_visible(conversations);
    }

    /// Whether unread counting is suppressed for a conversation under the
    /// configured policy.
    #[must_use]
    pub fn suppresses_unread(&self, conversation: &ConversationId) -> bool {
        match self.policy {
            UnreadPolicy::ActiveDetailOnly => self.view.active() == Some(conversation),
            UnreadPolicy::AnyVisiblePane => self.view.is_visible(conversation),
        }
    }

    /// Applies one push event to the stores.
    ///
    /// This is the only entry point for push-driven mutation. Returns the
    /// notifications the UI layer should receive; an empty vec means the
    /// event was a duplicate or was dropped.
    pub fn ingest(&mut self, event: PushEvent, now: Timestamp) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        match event {
            PushEvent::NewMessage(snap) => self.ingest_message(snap, &mut out),
            PushEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing,
            } => {
                if user_id == self.local_user {
                    // Self-typing events are never looped back into the
                    // local indicator.
                    tracing::debug!(conversation = %conversation_id, "ignoring own typing event");
                    return out;
                }
                let changed = if is_typing {
                    self.typing.start(conversation_id.clone(), user_id, now)
                } else {
                    self.typing.stop(&conversation_id, &user_id)
                };
                if changed {
                    out.push(SyncEvent::TypingChanged(conversation_id));
                }
            }
            PushEvent::NotificationRead {
                conversation_id,
                user_id,
            } => {
                if user_id != self.local_user {
                    tracing::debug!(
                        conversation = %conversation_id,
                        user = %user_id,
                        "dropping read notification for another user"
                    );
                    return out;
                }
                if self.conversations.mark_read(&conversation_id) {
                    out.push(SyncEvent::ConversationsChanged);
                }
            }
            PushEvent::ConversationUpdated(snap) => {
                if self.conversations.upsert_from_snapshot(vec![snap]) > 0 {
                    out.push(SyncEvent::ConversationsChanged);
                }
            }
            PushEvent::ConversationDeleted { conversation_id } => {
                let removed = self.conversations.remove(&conversation_id);
                let had_messages = self.messages.remove_conversation(&conversation_id);
                self.typing.clear_conversation(&conversation_id);
                if self.view.active() == Some(&conversation_id) {
                    self.view.set_active(None);
                }
                if removed || had_messages {
                    out.push(SyncEvent::ConversationsChanged);
                    out.push(SyncEvent::MessagesChanged(conversation_id));
                }
            }
        }
        out
    }

    fn ingest_message(&mut self, snap: MessageSnapshot, out: &mut Vec<SyncEvent>) {
        let conversation = snap.conversation_id.clone();
        let sender = snap.sender_id.clone();

        let stored = StoredMessage::confirmed(snap.clone());
        match self.messages.append_or_merge(stored) {
            MergeOutcome::Duplicate => return,
            MergeOutcome::Inserted | MergeOutcome::ConfirmedPending => {
                out.push(SyncEvent::MessagesChanged(conversation.clone()));
            }
        }

        // A confirmed message from the typist ends their indicator now.
        if self.typing.note_message(&conversation, &sender) {
            out.push(SyncEvent::TypingChanged(conversation.clone()));
        }

        let sender_name = self.conversations.get(&conversation).map_or_else(
            || sender.as_str().to_string(),
            |entry| entry.participant_name(&sender),
        );
        let count_unread = sender != self.local_user && !self.suppresses_unread(&conversation);
        if self
            .conversations
            .apply_incoming_message(&snap, &sender_name, count_unread)
        {
            out.push(SyncEvent::ConversationsChanged);
        } else {
            // Message for a conversation we have not loaded — the engine
            // fetches a fresh snapshot page to discover it.
            out.push(SyncEvent::ConversationDiscovered(conversation));
        }
    }

    /// Merges a REST page of conversation snapshots (initial load, pagination
    /// or resync).
    pub fn load_conversation_page(
        &mut self,
        snapshots: Vec<ConversationSnapshot>,
    ) -> Vec<SyncEvent> {
        if self.conversations.upsert_from_snapshot(snapshots) > 0 {
            vec![SyncEvent::ConversationsChanged]
        } else {
            Vec::new()
        }
    }

    /// Merges a REST page of messages (newest-first, as served).
    pub fn load_message_page(
        &mut self,
        conversation: &ConversationId,
        newest_first: Vec<MessageSnapshot>,
    ) -> Vec<SyncEvent> {
        if self.messages.load_page(conversation, newest_first) > 0 {
            vec![SyncEvent::MessagesChanged(conversation.clone())]
        } else {
            Vec::new()
        }
    }

    /// Expires lapsed typing indicators, returning notifications for the
    /// affected conversations.
    pub fn expire_typing(&mut self, now: Timestamp) -> Vec<SyncEvent> {
        let mut seen = HashSet::new();
        self.typing
            .expire_due(now)
            .into_iter()
            .filter_map(|(conversation, _)| {
                seen.insert(conversation.clone())
                    .then_some(SyncEvent::TypingChanged(conversation))
            })
            .collect()
    }
}

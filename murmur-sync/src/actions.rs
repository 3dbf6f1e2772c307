//! Optimistic action coordinator.
//!
//! Every locally-originated mutation follows the same shape: apply the new
//! state to the stores synchronously (content appears instantly), issue the
//! transport call, then reconcile the authoritative result or roll back.
//! Sends are the one exception to rollback — user-authored content never
//! vanishes silently, so a failed send becomes a visible `Failed` entry with
//! a retry affordance instead.
//!
//! A second action of the same kind on the same entity while one is in
//! flight (the double-tap like) is suppressed via an in-flight set keyed by
//! `(entity, kind)`.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use murmur_proto::conversation::{ConversationId, UserId};
use murmur_proto::event::{ClientEvent, PushEvent};
use murmur_proto::message::{ClientTag, MessageDraft, MessageId, Timestamp};

use crate::bus::EventBus;
use crate::engine::SyncEvent;
use crate::ingest::Reconciler;
use crate::store::StoredMessage;
use crate::transport::{ConnectionState, PushChannel, PushError, RestApi, RestError};

/// What kind of optimistic action is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Sending a message.
    SendMessage,
    /// Liking or unliking a message.
    Like,
    /// Sharing a message.
    Share,
    /// Marking a conversation read.
    MarkRead,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendMessage => write!(f, "send"),
            Self::Like => write!(f, "like"),
            Self::Share => write!(f, "share"),
            Self::MarkRead => write!(f, "mark-read"),
        }
    }
}

/// Errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The draft failed validation; no store mutation happened.
    #[error("validation failed: {0}")]
    Validation(#[from] murmur_proto::message::ValidationError),

    /// The same action is already in flight for this entity; the duplicate
    /// request is ignored.
    #[error("action already in flight for this target")]
    InFlight,

    /// The referenced conversation is not in the store.
    #[error("unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    /// The referenced message is not in the store.
    #[error("unknown message: {0}")]
    UnknownMessage(MessageId),

    /// The REST call failed (the optimistic state has been handled per the
    /// action's failure policy).
    #[error(transparent)]
    Rest(#[from] RestError),
}

/// Removes its `(entity, kind)` key from the in-flight set on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<(String, ActionKind)>>,
    key: (String, ActionKind),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Coordinates optimistic local mutations against the stores and transports.
pub struct ActionCoordinator<R: RestApi, P: PushChannel> {
    rest: Arc<R>,
    bus: Arc<EventBus<P>>,
    state: Arc<RwLock<Reconciler>>,
    local_user: UserId,
    in_flight: Mutex<HashSet<(String, ActionKind)>>,
    events: mpsc::Sender<SyncEvent>,
}

impl<R: RestApi, P: PushChannel + 'static> ActionCoordinator<R, P> {
    /// Creates a coordinator over shared engine state.
    pub(crate) fn new(
        rest: Arc<R>,
        bus: Arc<EventBus<P>>,
        state: Arc<RwLock<Reconciler>>,
        local_user: UserId,
        events: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            rest,
            bus,
            state,
            local_user,
            in_flight: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Sends a message optimistically.
    ///
    /// The message appears immediately as `Pending` under a provisional id.
    /// Transmission goes over the push channel, falling back to REST while
    /// the channel is down; on total failure the entry becomes `Failed` and
    /// stays visible for retry. Returns the provisional id.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Validation`] for an empty or oversized draft
    /// (checked before any store mutation), or [`ActionError::Rest`] when
    /// both transports fail.
    pub async fn send_message(
        &self,
        conversation: ConversationId,
        draft: MessageDraft,
    ) -> Result<MessageId, ActionError> {
        draft.validate()?;

        let tag = ClientTag::new();
        let pending = StoredMessage::pending(
            conversation.clone(),
            self.local_user.clone(),
            draft.clone(),
            tag.clone(),
            Timestamp::now(),
        );
        let provisional = pending.id.clone();
        self.state.write().messages_mut().append_or_merge(pending);
        self.notify(SyncEvent::MessagesChanged(conversation.clone()));

        let event = ClientEvent::SendMessage {
            conversation_id: conversation.clone(),
            content: draft.content,
            media: draft.media,
            client_tag: tag,
        };
        self.transmit(&conversation, &provisional, event).await?;
        Ok(provisional)
    }

    /// Retries a failed send, reusing its original correlation token.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::UnknownMessage`] unless the message exists and
    /// is `Failed`, or [`ActionError::Rest`] when transmission fails again.
    pub async fn retry_send(
        &self,
        conversation: ConversationId,
        message: MessageId,
    ) -> Result<(), ActionError> {
        let retried = self
            .state
            .write()
            .messages_mut()
            .mark_pending(&conversation, &message)
            .ok_or_else(|| ActionError::UnknownMessage(message.clone()))?;
        self.notify(SyncEvent::MessagesChanged(conversation.clone()));

        let event = ClientEvent::SendMessage {
            conversation_id: conversation.clone(),
            content: retried.content.clone(),
            media: retried.media.clone(),
            client_tag: retried
                .client_tag
                .clone()
                .unwrap_or_default(),
        };
        self.transmit(&conversation, &message, event).await
    }

    /// Discards a failed send the user gave up on. Returns whether an entry
    /// was removed.
    pub fn discard_failed(&self, conversation: &ConversationId, message: &MessageId) -> bool {
        let removed = self
            .state
            .write()
            .messages_mut()
            .discard_failed(conversation, message);
        if removed {
            self.notify(SyncEvent::MessagesChanged(conversation.clone()));
        }
        removed
    }

    /// Toggles the local user's like on a message, optimistically.
    ///
    /// On failure the prior `likes_count`/`is_liked` are restored exactly
    /// and an [`SyncEvent::ActionFailed`] toast is emitted. Returns the new
    /// liked state.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InFlight`] for a duplicate tap,
    /// [`ActionError::UnknownMessage`] for an unknown target, or
    /// [`ActionError::Rest`] after a rollback.
    pub async fn toggle_like(
        &self,
        conversation: ConversationId,
        message: MessageId,
    ) -> Result<bool, ActionError> {
        let _guard = self
            .begin(message.as_str(), ActionKind::Like)
            .ok_or(ActionError::InFlight)?;

        let (prior, desired) = {
            let mut state = self.state.write();
            let current = state
                .messages()
                .get(&conversation, &message)
                .map(|m| m.is_liked)
                .ok_or_else(|| ActionError::UnknownMessage(message.clone()))?;
            let desired = !current;
            let prior = state
                .messages_mut()
                .apply_like(&conversation, &message, desired)
                .ok_or_else(|| ActionError::UnknownMessage(message.clone()))?;
            (prior, desired)
        };
        self.notify(SyncEvent::MessagesChanged(conversation.clone()));

        match self.rest.set_like(&conversation, &message, desired).await {
            Ok(()) => Ok(desired),
            Err(err) => {
                self.state
                    .write()
                    .messages_mut()
                    .restore_like(&conversation, &message, prior);
                self.notify(SyncEvent::MessagesChanged(conversation.clone()));
                self.fail(ActionKind::Like, message.as_str(), &err);
                Err(err.into())
            }
        }
    }

    /// Shares a message, optimistically bumping its counter.
    ///
    /// # Errors
    ///
    /// Same surface as [`toggle_like`](Self::toggle_like).
    pub async fn share(
        &self,
        conversation: ConversationId,
        message: MessageId,
    ) -> Result<(), ActionError> {
        let _guard = self
            .begin(message.as_str(), ActionKind::Share)
            .ok_or(ActionError::InFlight)?;

        let prior = self
            .state
            .write()
            .messages_mut()
            .apply_share(&conversation, &message)
            .ok_or_else(|| ActionError::UnknownMessage(message.clone()))?;
        self.notify(SyncEvent::MessagesChanged(conversation.clone()));

        match self.rest.share_message(&conversation, &message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state
                    .write()
                    .messages_mut()
                    .restore_share(&conversation, &message, prior);
                self.notify(SyncEvent::MessagesChanged(conversation.clone()));
                self.fail(ActionKind::Share, message.as_str(), &err);
                Err(err.into())
            }
        }
    }

    /// Marks a conversation read, optimistically zeroing its counter.
    ///
    /// Failure policy by error class:
    /// - `Conflict` (stale membership): the conversation is removed from the
    ///   stores, matching server reality.
    /// - `Unauthorized`: store state is frozen as-is until re-auth; the
    ///   error is surfaced.
    /// - anything else: the counter is rolled back — unless newer messages
    ///   advanced it while the call was in flight, in which case the newer
    ///   state wins.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InFlight`] for a duplicate request,
    /// [`ActionError::UnknownConversation`] for an unknown target, or
    /// [`ActionError::Rest`] on transport failure.
    pub async fn mark_read(&self, conversation: ConversationId) -> Result<(), ActionError> {
        let _guard = self
            .begin(conversation.as_str(), ActionKind::MarkRead)
            .ok_or(ActionError::InFlight)?;

        let prior = {
            let mut state = self.state.write();
            let prior = state
                .conversations()
                .unread_count(&conversation)
                .ok_or_else(|| ActionError::UnknownConversation(conversation.clone()))?;
            if prior == 0 {
                return Ok(());
            }
            state.conversations_mut().mark_read(&conversation);
            prior
        };
        self.notify(SyncEvent::ConversationsChanged);

        match self.rest.mark_read(&conversation).await {
            Ok(()) => Ok(()),
            Err(RestError::Conflict(reason)) => {
                tracing::warn!(
                    conversation = %conversation,
                    reason = %reason,
                    "mark-read conflict, removing stale conversation"
                );
                {
                    let mut state = self.state.write();
                    state.conversations_mut().remove(&conversation);
                    state.messages_mut().remove_conversation(&conversation);
                }
                self.notify(SyncEvent::ConversationsChanged);
                self.notify(SyncEvent::MessagesChanged(conversation));
                Ok(())
            }
            Err(RestError::Unauthorized) => {
                tracing::warn!(conversation = %conversation, "mark-read unauthorized, freezing state");
                self.fail(ActionKind::MarkRead, conversation.as_str(), &RestError::Unauthorized);
                Err(RestError::Unauthorized.into())
            }
            Err(err) => {
                {
                    let mut state = self.state.write();
                    // Only roll back if nothing advanced the counter while
                    // the call was in flight.
                    if state.conversations().unread_count(&conversation) == Some(0) {
                        state.conversations_mut().restore_unread(&conversation, prior);
                    }
                }
                self.notify(SyncEvent::ConversationsChanged);
                self.fail(ActionKind::MarkRead, conversation.as_str(), &err);
                Err(err.into())
            }
        }
    }

    /// Transmits a send: push channel first, REST fallback while the channel
    /// is down, `Failed` transition when both are unavailable.
    async fn transmit(
        &self,
        conversation: &ConversationId,
        provisional: &MessageId,
        event: ClientEvent,
    ) -> Result<(), ActionError> {
        let push_result = if self.bus.state() == ConnectionState::Connected {
            self.bus.emit(&event).await
        } else {
            Err(PushError::NotConnected)
        };

        let rest_error = match push_result {
            // Confirmation arrives as the newMessage echo carrying our tag.
            Ok(()) => return Ok(()),
            Err(push_err) => {
                tracing::debug!(
                    conversation = %conversation,
                    error = %push_err,
                    "push send unavailable, falling back to REST"
                );
                match self.rest.send_message(&event).await {
                    Ok(snapshot) => {
                        // The authoritative payload goes through the same
                        // reconciliation path as a push echo would.
                        let events = self
                            .state
                            .write()
                            .ingest(PushEvent::NewMessage(snapshot), Timestamp::now());
                        for event in events {
                            self.notify(event);
                        }
                        return Ok(());
                    }
                    Err(err) => err,
                }
            }
        };

        self.state
            .write()
            .messages_mut()
            .mark_failed(conversation, provisional);
        self.notify(SyncEvent::MessagesChanged(conversation.clone()));
        self.fail(ActionKind::SendMessage, provisional.as_str(), &rest_error);
        Err(rest_error.into())
    }

    /// Claims an `(entity, kind)` slot, or `None` if one is already held.
    fn begin(&self, entity: &str, kind: ActionKind) -> Option<InFlightGuard<'_>> {
        let key = (entity.to_string(), kind);
        if self.in_flight.lock().insert(key.clone()) {
            Some(InFlightGuard {
                set: &self.in_flight,
                key,
            })
        } else {
            tracing::debug!(entity, kind = %kind, "duplicate action suppressed");
            None
        }
    }

    fn notify(&self, event: SyncEvent) {
        if self.events.try_send(event).is_err() {
            tracing::warn!("engine event buffer full, dropping notification");
        }
    }

    fn fail(&self, kind: ActionKind, entity: &str, error: &RestError) {
        self.notify(SyncEvent::ActionFailed {
            kind,
            entity: entity.to_string(),
            reason: error.to_string(),
        });
    }
}

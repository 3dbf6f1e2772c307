//! Push-channel event unions.
//!
//! Every frame on the push channel is one of two tagged unions: [`PushEvent`]
//! inbound, [`ClientEvent`] outbound. The `type`/`payload` tagging matches the
//! server's JSON framing, and consumers dispatch with one exhaustive match
//! instead of string comparisons on event names.

use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationId, ConversationSnapshot, UserId};
use crate::message::{ClientTag, MediaAttachment, MessageSnapshot};

/// Discriminant of a [`PushEvent`], used for typed subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message was posted to some conversation.
    NewMessage,
    /// A participant started or stopped typing.
    UserTyping,
    /// A conversation was marked read on some device.
    NotificationRead,
    /// Conversation metadata changed (also announces new conversations).
    ConversationUpdated,
    /// A conversation was deleted.
    ConversationDeleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewMessage => write!(f, "newMessage"),
            Self::UserTyping => write!(f, "userTyping"),
            Self::NotificationRead => write!(f, "notificationRead"),
            Self::ConversationUpdated => write!(f, "conversationUpdated"),
            Self::ConversationDeleted => write!(f, "conversationDeleted"),
        }
    }
}

/// An event delivered by the push channel.
///
/// Delivery is at-least-once and ordering across conversations is not
/// guaranteed — consumers must dedup and tolerate arbitrary arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum PushEvent {
    /// A message was posted to a conversation.
    NewMessage(MessageSnapshot),
    /// A participant's typing state changed.
    #[serde(rename_all = "camelCase")]
    UserTyping {
        /// Where the typing is happening.
        conversation_id: ConversationId,
        /// Who is typing (or stopped).
        user_id: UserId,
        /// `true` on typing-start, `false` on typing-stop.
        is_typing: bool,
    },
    /// A conversation was marked read.
    #[serde(rename_all = "camelCase")]
    NotificationRead {
        /// The conversation that was read.
        conversation_id: ConversationId,
        /// Whose read state changed.
        user_id: UserId,
    },
    /// Conversation metadata changed; carries a full snapshot so receivers
    /// can create conversations they have not seen yet.
    ConversationUpdated(ConversationSnapshot),
    /// A conversation was removed.
    #[serde(rename_all = "camelCase")]
    ConversationDeleted {
        /// The removed conversation.
        conversation_id: ConversationId,
    },
}

impl PushEvent {
    /// Returns the discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::UserTyping { .. } => EventKind::UserTyping,
            Self::NotificationRead { .. } => EventKind::NotificationRead,
            Self::ConversationUpdated(_) => EventKind::ConversationUpdated,
            Self::ConversationDeleted { .. } => EventKind::ConversationDeleted,
        }
    }

    /// Returns the conversation this event concerns.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::NewMessage(msg) => &msg.conversation_id,
            Self::UserTyping {
                conversation_id, ..
            }
            | Self::NotificationRead {
                conversation_id, ..
            }
            | Self::ConversationDeleted { conversation_id } => conversation_id,
            Self::ConversationUpdated(snap) => &snap.id,
        }
    }
}

/// An event emitted by the client over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Send a message; the server confirms with a `newMessage` event whose
    /// `clientTag` echoes the one given here.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Text body, absent for media-only sends.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Attached media, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media: Option<MediaAttachment>,
        /// Correlation token for matching the confirmation.
        client_tag: ClientTag,
    },
    /// Report the local user's typing state.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Where the local user is typing.
        conversation_id: ConversationId,
        /// `true` on start, `false` on stop.
        is_typing: bool,
    },
    /// Subscribe to a conversation's realtime events.
    #[serde(rename_all = "camelCase")]
    JoinConversation {
        /// The conversation to join.
        conversation_id: ConversationId,
    },
    /// Unsubscribe from a conversation's realtime events.
    #[serde(rename_all = "camelCase")]
    LeaveConversation {
        /// The conversation to leave.
        conversation_id: ConversationId,
    },
}

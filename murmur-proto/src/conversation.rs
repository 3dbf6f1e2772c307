//! Conversation payload types for the REST snapshot boundary.

use serde::{Deserialize, Serialize};

use crate::message::Timestamp;

/// Server-assigned conversation identifier (opaque).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a conversation identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this conversation ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned user identifier (opaque).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this user ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a conversation is a two-party thread or a named group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Exactly two participants; display name derived from the other party.
    Direct,
    /// Any number of participants; display name is authoritative.
    Group,
}

impl std::fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// Role of a participant within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Regular member.
    Member,
    /// Can manage membership and settings.
    Admin,
}

/// A user's membership entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// The participating user.
    pub user_id: UserId,
    /// Membership role.
    pub role: ParticipantRole,
    /// When the user joined the conversation.
    pub joined_at: Timestamp,
    /// Profile name as the server reports it.
    pub display_name: String,
    /// Profile photo URL, if the user has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// Compact preview of the most recent message, for list rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    /// Preview text (media messages surface a placeholder).
    pub content: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// When the previewed message was created.
    pub created_at: Timestamp,
}

/// A conversation as the server reports it, via REST pages or
/// `conversationUpdated` push events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    /// Server-assigned unique identifier.
    pub id: ConversationId,
    /// Direct thread or group.
    pub kind: ConversationKind,
    /// Current membership.
    pub participants: Vec<Participant>,
    /// Authoritative display name (groups only; absent for direct threads).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Authoritative photo URL (groups only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Preview of the most recent message, absent for empty conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    /// Server-side unread counter at snapshot time.
    pub unread_count: u32,
    /// Recency ordering key.
    pub updated_at: Timestamp,
}

/// One page of conversation snapshots from `GET conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    /// The snapshots on this page.
    pub conversations: Vec<ConversationSnapshot>,
    /// Opaque cursor for the next page, absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

//! Message payload types shared by the REST and push boundaries.
//!
//! All types in this module mirror what the server actually sends. Client-only
//! bookkeeping (delivery status, engagement rollback state) lives in the sync
//! engine, not here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{ConversationId, UserId};

/// Maximum allowed size of outgoing message text in bytes (8 KB).
pub const MAX_CONTENT_SIZE: usize = 8 * 1024;

/// Server-assigned message identifier.
///
/// Opaque — the server mints these, so the client never assumes a format.
/// Provisional client-side identifiers share this type until the server
/// echo replaces them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this message ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated correlation token carried by an outgoing send until the
/// server-confirmed echo arrives (UUID v7 for time-ordering).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientTag(Uuid);

impl ClientTag {
    /// Creates a new time-ordered correlation token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ClientTag` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns this timestamp advanced by `millis`, saturating on overflow.
    #[must_use]
    pub const fn saturating_add(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Kind of an attached media object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Audio clip or voice note.
    Audio,
    /// Generic file attachment.
    File,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::File => write!(f, "file"),
        }
    }
}

/// Media attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Where the media object is hosted.
    pub url: String,
    /// What kind of media the URL points at.
    pub kind: MediaKind,
}

/// A message as the server reports it, via REST pages or `newMessage` push
/// events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    /// Server-assigned unique identifier.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent the message.
    pub sender_id: UserId,
    /// Text body, absent for media-only messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Attached media, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
    /// Server-assigned creation time.
    pub created_at: Timestamp,
    /// Echo of the sender's correlation token, present only on the
    /// confirmation of a send this client originated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<ClientTag>,
}

/// Locally-authored message body awaiting transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Text body, absent for media-only sends.
    pub content: Option<String>,
    /// Attached media, if any.
    pub media: Option<MediaAttachment>,
}

/// Error returned when an outgoing draft fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Draft has neither text nor media.
    #[error("message has no content")]
    Empty,
    /// Draft text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl MessageDraft {
    /// Validates this draft for sending.
    ///
    /// A draft must carry text or media, and text must fit within
    /// [`MAX_CONTENT_SIZE`]. Whitespace-only text counts as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] for an empty draft, or
    /// [`ValidationError::TooLarge`] if the text exceeds the size limit.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let text = self.content.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() && self.media.is_none() {
            return Err(ValidationError::Empty);
        }
        if let Some(content) = &self.content {
            let size = content.len();
            if size > MAX_CONTENT_SIZE {
                return Err(ValidationError::TooLarge {
                    size,
                    max: MAX_CONTENT_SIZE,
                });
            }
        }
        Ok(())
    }
}

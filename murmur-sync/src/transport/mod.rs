//! Transport seams between the engine and the outside world.
//!
//! Defines the [`RestApi`] and [`PushChannel`] traits the engine consumes.
//! Concrete implementations:
//! - [`loopback`] — in-process channel-backed pair plus a scriptable REST
//!   double, for tests
//! - [`ws`] — WebSocket push channel with auto-reconnect
//!
//! Transports never mutate engine state. They only carry payloads; every
//! store mutation goes through the reconciliation layer or the action
//! coordinator.

pub mod loopback;
pub mod ws;

use std::fmt;

use murmur_proto::conversation::{ConversationId, ConversationPage, ConversationSnapshot, UserId};
use murmur_proto::event::ClientEvent;
use murmur_proto::message::{MessageId, MessageSnapshot};

/// Connection lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel is up; events flow.
    Connected,
    /// Channel is down and not currently retrying.
    Disconnected,
    /// Channel is down; a reconnect attempt is in progress.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Errors from the REST boundary.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The server could not be reached or answered with a transient failure.
    #[error("rest transport unavailable: {0}")]
    Unavailable(String),

    /// The session has expired; the caller must re-authenticate. Store state
    /// is frozen, never cleared, when this surfaces.
    #[error("unauthorized: session expired")]
    Unauthorized,

    /// The action conflicts with server-side state (e.g. marking read on a
    /// conversation the user no longer participates in).
    #[error("action conflict: {0}")]
    Conflict(String),

    /// The response could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors from the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The channel has shut down and will not recover.
    #[error("push channel closed")]
    Closed,

    /// The channel is not currently connected; callers should fall back to
    /// REST where one exists.
    #[error("push channel not connected")]
    NotConnected,

    /// A frame could not be encoded.
    #[error("push codec error: {0}")]
    Codec(#[from] murmur_proto::codec::CodecError),

    /// An underlying I/O error occurred.
    #[error("push I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An inbound signal from the push channel: a decoded event, or a
/// connection-state transition the adapter layer turns into resync logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    /// A decoded push event.
    Event(murmur_proto::event::PushEvent),
    /// The channel's connection state changed.
    State(ConnectionState),
}

/// The REST boundary the engine consumes.
///
/// Implementations own retries and authentication; they surface the error
/// taxonomy above and never touch engine state.
pub trait RestApi: Send + Sync {
    /// Fetch one page of conversation snapshots.
    fn fetch_conversations(
        &self,
        cursor: Option<String>,
    ) -> impl Future<Output = Result<ConversationPage, RestError>> + Send;

    /// Fetch up to `limit` messages of a conversation, newest-first as the
    /// server orders them; callers reverse into rendering order.
    fn fetch_messages(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<MessageSnapshot>, RestError>> + Send;

    /// Mark a conversation read.
    fn mark_read(
        &self,
        conversation: &ConversationId,
    ) -> impl Future<Output = Result<(), RestError>> + Send;

    /// Create a conversation with the given participants.
    fn create_conversation(
        &self,
        participants: &[UserId],
    ) -> impl Future<Output = Result<ConversationSnapshot, RestError>> + Send;

    /// Fallback send used only while the push channel is not connected.
    /// Returns the authoritative confirmed message.
    fn send_message(
        &self,
        event: &ClientEvent,
    ) -> impl Future<Output = Result<MessageSnapshot, RestError>> + Send;

    /// Set or clear the local user's like on a message.
    fn set_like(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        liked: bool,
    ) -> impl Future<Output = Result<(), RestError>> + Send;

    /// Share a message.
    fn share_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> impl Future<Output = Result<(), RestError>> + Send;
}

/// The push-channel boundary the engine consumes.
///
/// Delivery toward the client is at-least-once with no cross-conversation
/// ordering guarantee; the reconciliation layer dedups.
pub trait PushChannel: Send + Sync {
    /// Emit an outbound event.
    fn emit(&self, event: &ClientEvent) -> impl Future<Output = Result<(), PushError>> + Send;

    /// Receive the next inbound signal. Blocks until an event arrives or the
    /// connection state changes.
    fn recv(&self) -> impl Future<Output = Result<PushSignal, PushError>> + Send;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

//! JSON framing for the push channel.
//!
//! The push channel carries one JSON object per text frame. Encoding failures
//! are programming errors surfaced as [`CodecError`]; decoding failures are
//! expected in the wild (version skew, proxy mangling) and must be treated as
//! diagnostics, never as fatal.

use crate::event::{ClientEvent, PushEvent};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization to a frame failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// A frame could not be parsed into an event.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Encodes an outbound [`ClientEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes an inbound JSON text frame into a [`PushEvent`].
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the frame is not a known event.
pub fn decode_push(frame: &str) -> Result<PushEvent, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encodes a [`PushEvent`] as a JSON text frame.
///
/// The client never sends these; servers and test harnesses do.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the event cannot be serialized.
pub fn encode_push(event: &PushEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a JSON text frame into a [`ClientEvent`].
///
/// The client never receives these; servers and test harnesses do.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the frame is not a known event.
pub fn decode_client(frame: &str) -> Result<ClientEvent, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::Decode(e.to_string()))
}

//! In-memory state owned by the sync engine.
//!
//! The stores are plain synchronous structures with no interior locking; the
//! engine wraps them in a single lock and is, together with the action
//! coordinator, the only writer. All mutators are pure with respect to their
//! inputs — callers supply timestamps — so every merge rule is testable
//! without touching the wall clock.

pub mod conversation;
pub mod message;

pub use conversation::{ConversationEntry, ConversationStore};
pub use message::{LikeState, MergeOutcome, MessageStatus, MessageStore, StoredMessage};

//! Typing indicator tracking with deadline-based expiry.
//!
//! One deadline map over `(conversation, user)` keys replaces a timer per
//! key: every typing-start installs or refreshes a deadline, and a single
//! sweeper asks [`TypingTracker::expire_due`] what lapsed. All transitions
//! take an explicit `now`, so tests drive the clock directly.
//!
//! The outbound side ([`LocalTypingReporter`]) debounces the local user's
//! input into start/stop emissions: start on first keystroke, stop after a
//! quiet period or immediately on send.

use std::collections::HashMap;
use std::time::Duration;

use murmur_proto::conversation::{ConversationId, UserId};
use murmur_proto::event::ClientEvent;
use murmur_proto::message::Timestamp;

/// How long a typing indicator lives without a refresh.
pub const TYPING_TTL: Duration = Duration::from_millis(3000);

/// Quiet period after which the local user's typing-stop is reported.
pub const LOCAL_STOP_AFTER: Duration = Duration::from_millis(1000);

/// Tracks which remote users are typing in which conversations.
#[derive(Debug)]
pub struct TypingTracker {
    /// Expiry deadline per `(conversation, user)` pair.
    deadlines: HashMap<(ConversationId, UserId), Timestamp>,
    /// Indicator time-to-live in milliseconds.
    ttl_ms: u64,
}

impl TypingTracker {
    /// Creates a tracker with the given indicator TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            deadlines: HashMap::new(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Handles a typing-start: installs or refreshes the expiry deadline
    /// (debounced — repeated starts reset the timer, they do not stack).
    ///
    /// Returns `true` if the user was not already typing there.
    pub fn start(&mut self, conversation: ConversationId, user: UserId, now: Timestamp) -> bool {
        self.deadlines
            .insert((conversation, user), now.saturating_add(self.ttl_ms))
            .is_none()
    }

    /// Handles an explicit typing-stop. Returns `true` if the user was
    /// typing.
    pub fn stop(&mut self, conversation: &ConversationId, user: &UserId) -> bool {
        self.deadlines
            .remove(&(conversation.clone(), user.clone()))
            .is_some()
    }

    /// A confirmed message from `sender` implies their typing ended — force
    /// the transition immediately rather than waiting out the TTL.
    ///
    /// Returns `true` if the sender was typing.
    pub fn note_message(&mut self, conversation: &ConversationId, sender: &UserId) -> bool {
        self.stop(conversation, sender)
    }

    /// Removes every entry whose deadline has passed, returning the affected
    /// keys. An entry expires at `start + TTL` exactly: not a millisecond
    /// before, never later than the next sweep.
    pub fn expire_due(&mut self, now: Timestamp) -> Vec<(ConversationId, UserId)> {
        let expired: Vec<(ConversationId, UserId)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.deadlines.remove(key);
        }
        expired
    }

    /// Earliest pending deadline, for sweep scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.values().min().copied()
    }

    /// Users currently typing in a conversation, sorted for deterministic
    /// rendering.
    #[must_use]
    pub fn typing_in(&self, conversation: &ConversationId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .deadlines
            .keys()
            .filter(|(conv, _)| conv == conversation)
            .map(|(_, user)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Whether a specific user is typing in a conversation.
    #[must_use]
    pub fn is_typing(&self, conversation: &ConversationId, user: &UserId) -> bool {
        self.deadlines
            .contains_key(&(conversation.clone(), user.clone()))
    }

    /// Drops all state for a conversation (explicit deletion).
    pub fn clear_conversation(&mut self, conversation: &ConversationId) {
        self.deadlines.retain(|(conv, _), _| conv != conversation);
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(TYPING_TTL)
    }
}

/// Debounces the local user's input into typing start/stop emissions.
///
/// `input()` on a quiet conversation yields a start emission; further input
/// just pushes the stop deadline out. `tick()` yields the stop emission once
/// the quiet period elapses, and `sent()` yields it immediately (a sent
/// message implies typing ended).
#[derive(Debug)]
pub struct LocalTypingReporter {
    /// Quiet period before a stop is reported, in milliseconds.
    stop_after_ms: u64,
    /// Conversation currently reported as typing, with its stop deadline.
    active: Option<(ConversationId, Timestamp)>,
}

impl LocalTypingReporter {
    /// Creates a reporter with the given quiet period.
    #[must_use]
    pub fn new(stop_after: Duration) -> Self {
        Self {
            stop_after_ms: u64::try_from(stop_after.as_millis()).unwrap_or(u64::MAX),
            active: None,
        }
    }

    /// Notes local input in a conversation. Returns the emissions due: a
    /// stop for a previously-active other conversation, and a start if this
    /// conversation was not already reported.
    pub fn input(&mut self, conversation: &ConversationId, now: Timestamp) -> Vec<ClientEvent> {
        let deadline = now.saturating_add(self.stop_after_ms);
        let mut emissions = Vec::new();
        match &mut self.active {
            Some((active, stop_at)) if active == conversation => {
                *stop_at = deadline;
            }
            Some((active, _)) => {
                emissions.push(ClientEvent::Typing {
                    conversation_id: active.clone(),
                    is_typing: false,
                });
                emissions.push(ClientEvent::Typing {
                    conversation_id: conversation.clone(),
                    is_typing: true,
                });
                self.active = Some((conversation.clone(), deadline));
            }
            None => {
                emissions.push(ClientEvent::Typing {
                    conversation_id: conversation.clone(),
                    is_typing: true,
                });
                self.active = Some((conversation.clone(), deadline));
            }
        }
        emissions
    }

    /// Emits the pending stop if the quiet period has elapsed.
    pub fn tick(&mut self, now: Timestamp) -> Option<ClientEvent> {
        match &self.active {
            Some((conversation, stop_at)) if now >= *stop_at => {
                let event = ClientEvent::Typing {
                    conversation_id: conversation.clone(),
                    is_typing: false,
                };
                self.active = None;
                Some(event)
            }
            _ => None,
        }
    }

    /// The local user sent a message: report the stop immediately.
    pub fn sent(&mut self, conversation: &ConversationId) -> Option<ClientEvent> {
        match &self.active {
            Some((active, _)) if active == conversation => {
                self.active = None;
                Some(ClientEvent::Typing {
                    conversation_id: conversation.clone(),
                    is_typing: false,
                })
            }
            _ => None,
        }
    }

    /// Deadline of the pending stop, for scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.active.as_ref().map(|(_, stop_at)| *stop_at)
    }
}

impl Default for LocalTypingReporter {
    fn default() -> Self {
        Self::new(LOCAL_STOP_AFTER)
    }
}

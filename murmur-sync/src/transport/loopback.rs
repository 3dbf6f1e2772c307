//! In-process transport doubles for testing.
//!
//! [`loopback_push`] builds a connected [`LoopbackPush`] / [`PushHarness`]
//! pair over `tokio::sync::mpsc` channels: the harness plays the server,
//! injecting events and state transitions and observing emissions. The
//! [`ScriptedRest`] double answers REST calls from scripted responses and
//! supports one-shot failure injection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use murmur_proto::conversation::{
    ConversationId, ConversationKind, ConversationPage, ConversationSnapshot, Participant,
    ParticipantRole, UserId,
};
use murmur_proto::event::ClientEvent;
use murmur_proto::message::{MessageId, MessageSnapshot, Timestamp};

use super::{ConnectionState, PushChannel, PushError, PushSignal, RestApi, RestError};

/// In-process push channel backed by mpsc channels.
pub struct LoopbackPush {
    /// Connection state shared with the harness.
    state: Arc<parking_lot::Mutex<ConnectionState>>,
    /// Inbound signals injected by the harness.
    inbound: tokio::sync::Mutex<mpsc::Receiver<PushSignal>>,
    /// Outbound emissions, observed by the harness.
    outbound: mpsc::Sender<ClientEvent>,
}

/// The server side of a loopback pair.
pub struct PushHarness {
    state: Arc<parking_lot::Mutex<ConnectionState>>,
    inbound_tx: mpsc::Sender<PushSignal>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<ClientEvent>>,
}

/// Creates a connected push-channel pair with the given channel capacity.
///
/// The channel starts out `Connected`.
#[must_use]
pub fn loopback_push(buffer: usize) -> (LoopbackPush, PushHarness) {
    let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
    let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
    let state = Arc::new(parking_lot::Mutex::new(ConnectionState::Connected));

    let push = LoopbackPush {
        state: Arc::clone(&state),
        inbound: tokio::sync::Mutex::new(inbound_rx),
        outbound: outbound_tx,
    };
    let harness = PushHarness {
        state,
        inbound_tx,
        outbound_rx: tokio::sync::Mutex::new(outbound_rx),
    };
    (push, harness)
}

impl PushChannel for LoopbackPush {
    async fn emit(&self, event: &ClientEvent) -> Result<(), PushError> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(PushError::NotConnected);
        }
        self.outbound
            .send(event.clone())
            .await
            .map_err(|_| PushError::Closed)
    }

    async fn recv(&self) -> Result<PushSignal, PushError> {
        let mut rx = self.inbound.lock().await;
        rx.recv().await.ok_or(PushError::Closed)
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

impl PushHarness {
    /// Delivers a push event to the client side.
    ///
    /// # Panics
    ///
    /// Panics if the client side has been dropped (a test wiring error).
    pub async fn inject(&self, event: murmur_proto::event::PushEvent) {
        self.inbound_tx
            .send(PushSignal::Event(event))
            .await
            .unwrap_or_else(|_| panic!("loopback client side dropped"));
    }

    /// Transitions the channel's connection state and notifies the client.
    pub async fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        self.inbound_tx
            .send(PushSignal::State(state))
            .await
            .unwrap_or_else(|_| panic!("loopback client side dropped"));
    }

    /// Waits for the next client emission.
    pub async fn next_emitted(&self) -> Option<ClientEvent> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Returns the next client emission if one is already queued.
    pub async fn try_next_emitted(&self) -> Option<ClientEvent> {
        self.outbound_rx.lock().await.try_recv().ok()
    }

    /// Drains every queued client emission.
    pub async fn drain_emitted(&self) -> Vec<ClientEvent> {
        let mut rx = self.outbound_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(event) = rx.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// Scriptable in-memory [`RestApi`] double.
///
/// Conversation pages are served in the order they were scripted (the last
/// one repeats); message fetches answer from per-conversation scripts.
/// [`fail_next`](Self::fail_next) arms a one-shot failure consumed by the
/// next call, whichever endpoint it hits.
#[derive(Default)]
pub struct ScriptedRest {
    pages: parking_lot::Mutex<VecDeque<ConversationPage>>,
    messages: parking_lot::Mutex<HashMap<ConversationId, Vec<MessageSnapshot>>>,
    armed_failure: parking_lot::Mutex<Option<RestError>>,
    delay: parking_lot::Mutex<Option<std::time::Duration>>,
    mark_read_calls: parking_lot::Mutex<Vec<ConversationId>>,
    like_calls: parking_lot::Mutex<Vec<(ConversationId, MessageId, bool)>>,
    share_calls: parking_lot::Mutex<Vec<(ConversationId, MessageId)>>,
    sent: parking_lot::Mutex<Vec<ClientEvent>>,
    fetch_count: AtomicU64,
    next_server_id: AtomicU64,
}

impl ScriptedRest {
    /// Creates an empty double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a conversations page to serve.
    pub fn push_page(&self, page: ConversationPage) {
        self.pages.lock().push_back(page);
    }

    /// Scripts the newest-first message list for a conversation.
    pub fn set_messages(&self, conversation: ConversationId, newest_first: Vec<MessageSnapshot>) {
        self.messages.lock().insert(conversation, newest_first);
    }

    /// Arms a one-shot failure for the next call.
    pub fn fail_next(&self, error: RestError) {
        *self.armed_failure.lock() = Some(error);
    }

    /// Delays every call by the given duration (for in-flight overlap tests).
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Conversations passed to `mark_read` so far.
    #[must_use]
    pub fn mark_read_calls(&self) -> Vec<ConversationId> {
        self.mark_read_calls.lock().clone()
    }

    /// Like calls observed so far.
    #[must_use]
    pub fn like_calls(&self) -> Vec<(ConversationId, MessageId, bool)> {
        self.like_calls.lock().clone()
    }

    /// Share calls observed so far.
    #[must_use]
    pub fn share_calls(&self) -> Vec<(ConversationId, MessageId)> {
        self.share_calls.lock().clone()
    }

    /// Send events that went through the REST fallback.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<ClientEvent> {
        self.sent.lock().clone()
    }

    /// Number of `fetch_conversations` calls served.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Applies the configured delay, then consumes any armed failure.
    async fn gate(&self) -> Result<(), RestError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.armed_failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl RestApi for ScriptedRest {
    async fn fetch_conversations(
        &self,
        _cursor: Option<String>,
    ) -> Result<ConversationPage, RestError> {
        self.gate().await?;
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let mut pages = self.pages.lock();
        let page = if pages.len() > 1 {
            pages.pop_front()
        } else {
            pages.front().cloned()
        };
        Ok(page.unwrap_or(ConversationPage {
            conversations: Vec::new(),
            next_cursor: None,
        }))
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<MessageSnapshot>, RestError> {
        self.gate().await?;
        let mut newest_first = self
            .messages
            .lock()
            .get(conversation)
            .cloned()
            .unwrap_or_default();
        newest_first.truncate(limit);
        Ok(newest_first)
    }

    async fn mark_read(&self, conversation: &ConversationId) -> Result<(), RestError> {
        self.gate().await?;
        self.mark_read_calls.lock().push(conversation.clone());
        Ok(())
    }

    async fn create_conversation(
        &self,
        participants: &[UserId],
    ) -> Result<ConversationSnapshot, RestError> {
        self.gate().await?;
        let n = self.next_server_id.fetch_add(1, Ordering::SeqCst);
        Ok(ConversationSnapshot {
            id: ConversationId::new(format!("conv-{n}")),
            kind: if participants.len() == 2 {
                ConversationKind::Direct
            } else {
                ConversationKind::Group
            },
            participants: participants
                .iter()
                .map(|user| Participant {
                    user_id: user.clone(),
                    role: ParticipantRole::Member,
                    joined_at: Timestamp::now(),
                    display_name: user.as_str().to_string(),
                    photo_url: None,
                })
                .collect(),
            display_name: None,
            photo_url: None,
            last_message: None,
            unread_count: 0,
            updated_at: Timestamp::now(),
        })
    }

    async fn send_message(&self, event: &ClientEvent) -> Result<MessageSnapshot, RestError> {
        self.gate().await?;
        let ClientEvent::SendMessage {
            conversation_id,
            content,
            media,
            client_tag,
        } = event
        else {
            return Err(RestError::Malformed(
                "send_message expects a sendMessage event".into(),
            ));
        };
        self.sent.lock().push(event.clone());
        let n = self.next_server_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageSnapshot {
            id: MessageId::new(format!("srv-{n}")),
            conversation_id: conversation_id.clone(),
            sender_id: UserId::new("u-local"),
            content: content.clone(),
            media: media.clone(),
            created_at: Timestamp::now(),
            client_tag: Some(client_tag.clone()),
        })
    }

    async fn set_like(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        liked: bool,
    ) -> Result<(), RestError> {
        self.gate().await?;
        self.like_calls
            .lock()
            .push((conversation.clone(), message.clone(), liked));
        Ok(())
    }

    async fn share_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> Result<(), RestError> {
        self.gate().await?;
        self.share_calls
            .lock()
            .push((conversation.clone(), message.clone()));
        Ok(())
    }
}

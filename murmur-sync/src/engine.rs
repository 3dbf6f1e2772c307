//! The process-scoped sync engine.
//!
//! One [`SyncEngine`] is constructed per process and injected into views —
//! views never subscribe to the push channel themselves, which is what
//! eliminates the duplicate-listener and missed-cleanup failure modes of
//! per-view subscriptions. `start()` performs the initial REST load and
//! spawns the background pumps; `stop()` shuts them down and leaves the
//! active conversation.
//!
//! Reads are cheap snapshots taken under a short read lock and never block
//! on the network. All writes go through the reconciliation layer or the
//! action coordinator.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use murmur_proto::conversation::{ConversationId, UserId};
use murmur_proto::event::{ClientEvent, EventKind, PushEvent};
use murmur_proto::message::{MessageDraft, MessageId, Timestamp};

use crate::actions::{ActionCoordinator, ActionError, ActionKind};
use crate::bus::{BusEvent, EventBus};
use crate::config::SyncConfig;
use crate::ingest::Reconciler;
use crate::store::{ConversationEntry, StoredMessage};
use crate::transport::{ConnectionState, PushChannel, RestApi, RestError};
use crate::typing::{LocalTypingReporter, TypingTracker};

/// Notifications the engine emits toward the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The conversation list changed (ordering, previews, unread counts,
    /// membership).
    ConversationsChanged,
    /// A conversation's message list changed.
    MessagesChanged(ConversationId),
    /// A conversation's typing set changed.
    TypingChanged(ConversationId),
    /// The push channel's connection state changed (non-blocking indicator;
    /// cached data stays browsable).
    ConnectionChanged(ConnectionState),
    /// A reconnect-triggered refetch began.
    ResyncStarted,
    /// The reconnect-triggered refetch finished.
    ResyncCompleted,
    /// A message arrived for a conversation the engine has not loaded; a
    /// snapshot refetch has been scheduled.
    ConversationDiscovered(ConversationId),
    /// An optimistic action failed and was resolved per its failure policy
    /// (transient toast material).
    ActionFailed {
        /// What kind of action failed.
        kind: ActionKind,
        /// The entity it targeted (message or conversation id).
        entity: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Errors surfaced by engine lifecycle and fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A REST call failed.
    #[error(transparent)]
    Rest(#[from] RestError),

    /// An optimistic action failed.
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Ceiling on cursor-following when loading conversation snapshots, so a
/// misbehaving server cannot keep the engine paging forever.
const MAX_SNAPSHOT_PAGES: usize = 8;

/// The conversation synchronization engine.
pub struct SyncEngine<R: RestApi + 'static, P: PushChannel + 'static> {
    rest: Arc<R>,
    bus: Arc<EventBus<P>>,
    state: Arc<RwLock<Reconciler>>,
    actions: ActionCoordinator<R, P>,
    reporter: parking_lot::Mutex<LocalTypingReporter>,
    event_tx: mpsc::Sender<SyncEvent>,
    config: SyncConfig,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    running: AtomicBool,
}

impl<R: RestApi + 'static, P: PushChannel + 'static> SyncEngine<R, P> {
    /// Creates an engine over the given transports.
    ///
    /// Returns the engine and the [`SyncEvent`] stream the UI layer should
    /// consume. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        rest: Arc<R>,
        push: Arc<P>,
        local_user: UserId,
        config: SyncConfig,
    ) -> (Arc<Self>, mpsc::Receiver<SyncEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.tuning.event_buffer);
        let bus = EventBus::new(push, config.tuning.subscription_buffer);
        let state = Arc::new(RwLock::new(Reconciler::new(
            local_user.clone(),
            config.unread_policy,
            TypingTracker::new(config.typing.ttl),
        )));
        let actions = ActionCoordinator::new(
            Arc::clone(&rest),
            Arc::clone(&bus),
            Arc::clone(&state),
            local_user,
            event_tx.clone(),
        );

        let engine = Arc::new(Self {
            rest,
            bus,
            state,
            actions,
            reporter: parking_lot::Mutex::new(LocalTypingReporter::new(
                config.typing.local_stop_after,
            )),
            event_tx,
            config,
            tasks: parking_lot::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        });
        (engine, event_rx)
    }

    /// Starts the engine: initial conversation snapshot over REST, then the
    /// push pump and the typing sweeper. Idempotent.
    ///
    /// A transient failure of the initial fetch is tolerated — the store
    /// starts empty and the first resync fills it. An `Unauthorized` failure
    /// is returned, since nothing will work until re-auth.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Rest`] on an unauthorized initial fetch.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.fetch_snapshot_pages().await {
            Ok(snapshots) => {
                let events = self.state.write().load_conversation_page(snapshots);
                self.forward(events);
            }
            Err(RestError::Unauthorized) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(RestError::Unauthorized.into());
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "initial conversation fetch failed, starting with empty store"
                );
            }
        }

        let (mut bus_rx, bus_handle) = self.bus.spawn_pump(self.config.tuning.event_buffer);
        let pump_engine = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(signal) = bus_rx.recv().await {
                pump_engine.handle_bus_event(signal).await;
            }
        });

        let sweep_engine = Arc::clone(self);
        let sweep_interval = self.config.typing.sweep_interval;
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                sweep_engine.sweep(Timestamp::now()).await;
            }
        });

        self.tasks.lock().extend([bus_handle, pump, sweeper]);
        tracing::info!("sync engine started");
        Ok(())
    }

    /// Stops the engine: leaves the active conversation and aborts the
    /// background tasks. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let active = self.state.write().set_active(None);
        if let Some(conversation_id) = active {
            let _ = self
                .bus
                .emit(&ClientEvent::LeaveConversation { conversation_id })
                .await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!("sync engine stopped");
    }

    /// Whether the engine is currently started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // View state
    // -----------------------------------------------------------------------

    /// Switches the detail view to another conversation (or none).
    ///
    /// Leaves the previous conversation's realtime scope, joins the new one,
    /// loads its recent messages when the thread is empty, and marks it
    /// read. In-flight work for the previous conversation is logically
    /// cancelled: its completions re-validate against the new active id
    /// before touching view-related state.
    pub async fn set_active_conversation(&self, conversation: Option<ConversationId>) {
        let previous = self.state.write().set_active(conversation.clone());
        if previous == conversation {
            return;
        }
        if let Some(conversation_id) = previous {
            let _ = self
                .bus
                .emit(&ClientEvent::LeaveConversation { conversation_id })
                .await;
        }
        let Some(conversation) = conversation else {
            return;
        };

        let _ = self
            .bus
            .emit(&ClientEvent::JoinConversation {
                conversation_id: conversation.clone(),
            })
            .await;

        let needs_load = self.state.read().messages().messages(&conversation).is_empty();
        if needs_load && let Err(err) = self.load_recent_messages(&conversation).await {
            tracing::warn!(conversation = %conversation, error = %err, "message load failed");
        }

        if let Err(err) = self.actions.mark_read(conversation.clone()).await {
            tracing::debug!(conversation = %conversation, error = %err, "mark-read on open failed");
        }
    }

    /// Replaces the set of additionally-visible panes (split view).
    pub fn set_visible_conversations(&self, conversations: HashSet<ConversationId>) {
        self.state.write().set_visible(conversations);
    }

    // -----------------------------------------------------------------------
    // Reads (snapshots under a short lock; never block on the network)
    // -----------------------------------------------------------------------

    /// The conversation list, most recent first.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationEntry> {
        self.state
            .read()
            .conversations()
            .ordered()
            .into_iter()
            .cloned()
            .collect()
    }

    /// A conversation's messages in rendering order.
    #[must_use]
    pub fn messages(&self, conversation: &ConversationId) -> Vec<StoredMessage> {
        self.state.read().messages().messages(conversation).to_vec()
    }

    /// Users currently typing in a conversation.
    #[must_use]
    pub fn typing_users(&self, conversation: &ConversationId) -> Vec<UserId> {
        self.state.read().typing().typing_in(conversation)
    }

    /// Sum of unread counters across conversations (badge material).
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.state.read().conversations().total_unread()
    }

    /// Watchable connection state for a non-blocking indicator.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.bus.connection_state()
    }

    /// A typed subscription to raw push events of one kind.
    #[must_use]
    pub fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<PushEvent> {
        self.bus.subscribe(kind)
    }

    // -----------------------------------------------------------------------
    // Actions (optimistic; delegated to the coordinator)
    // -----------------------------------------------------------------------

    /// Sends a message in a conversation. See
    /// [`ActionCoordinator::send_message`].
    ///
    /// # Errors
    ///
    /// Propagates [`ActionError`] from the coordinator.
    pub async fn send_message(
        &self,
        conversation: ConversationId,
        draft: MessageDraft,
    ) -> Result<MessageId, ActionError> {
        // A send implies the local user stopped typing.
        let stop = self.reporter.lock().sent(&conversation);
        if let Some(event) = stop {
            let _ = self.bus.emit(&event).await;
        }
        self.actions.send_message(conversation, draft).await
    }

    /// Retries a failed send.
    ///
    /// # Errors
    ///
    /// Propagates [`ActionError`] from the coordinator.
    pub async fn retry_send(
        &self,
        conversation: ConversationId,
        message: MessageId,
    ) -> Result<(), ActionError> {
        self.actions.retry_send(conversation, message).await
    }

    /// Discards a failed send.
    pub fn discard_failed(&self, conversation: &ConversationId, message: &MessageId) -> bool {
        self.actions.discard_failed(conversation, message)
    }

    /// Toggles a like on a message.
    ///
    /// # Errors
    ///
    /// Propagates [`ActionError`] from the coordinator.
    pub async fn toggle_like(
        &self,
        conversation: ConversationId,
        message: MessageId,
    ) -> Result<bool, ActionError> {
        self.actions.toggle_like(conversation, message).await
    }

    /// Shares a message.
    ///
    /// # Errors
    ///
    /// Propagates [`ActionError`] from the coordinator.
    pub async fn share(
        &self,
        conversation: ConversationId,
        message: MessageId,
    ) -> Result<(), ActionError> {
        self.actions.share(conversation, message).await
    }

    /// Marks a conversation read.
    ///
    /// # Errors
    ///
    /// Propagates [`ActionError`] from the coordinator.
    pub async fn mark_read(&self, conversation: ConversationId) -> Result<(), ActionError> {
        self.actions.mark_read(conversation).await
    }

    /// Notes local keystrokes in a conversation, emitting debounced typing
    /// start/stop reports over the push channel.
    pub async fn note_input(&self, conversation: &ConversationId) {
        let emissions = self.reporter.lock().input(conversation, Timestamp::now());
        for event in emissions {
            let _ = self.bus.emit(&event).await;
        }
    }

    // -----------------------------------------------------------------------
    // Fetches
    // -----------------------------------------------------------------------

    /// Refetches the conversation snapshots (following the pagination
    /// cursor) and merges them.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Rest`] if the fetch fails.
    pub async fn refresh_conversations(&self) -> Result<(), EngineError> {
        let snapshots = self.fetch_snapshot_pages().await?;
        let events = self.state.write().load_conversation_page(snapshots);
        self.forward(events);
        Ok(())
    }

    /// Creates a conversation with the given participants and inserts the
    /// server's snapshot. Returns the new conversation's id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Rest`] if the create call fails; nothing is
    /// inserted locally in that case.
    pub async fn create_conversation(
        &self,
        participants: &[UserId],
    ) -> Result<ConversationId, EngineError> {
        let snapshot = self.rest.create_conversation(participants).await?;
        let id = snapshot.id.clone();
        let events = self.state.write().load_conversation_page(vec![snapshot]);
        self.forward(events);
        Ok(id)
    }

    /// Walks the conversations endpoint's pagination cursor, bounded by
    /// [`MAX_SNAPSHOT_PAGES`].
    async fn fetch_snapshot_pages(
        &self,
    ) -> Result<Vec<murmur_proto::conversation::ConversationSnapshot>, RestError> {
        let mut snapshots = Vec::new();
        let mut cursor = None;
        for _ in 0..MAX_SNAPSHOT_PAGES {
            let page = self.rest.fetch_conversations(cursor).await?;
            snapshots.extend(page.conversations);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(snapshots),
            }
        }
        tracing::warn!(
            pages = MAX_SNAPSHOT_PAGES,
            "conversation pagination cap reached, truncating snapshot load"
        );
        Ok(snapshots)
    }

    /// Loads older history for a conversation by widening the fetch window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Rest`] if the fetch fails.
    pub async fn load_older_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<(), EngineError> {
        let known = self.state.read().messages().messages(conversation).len();
        let limit = known + self.config.tuning.message_page_size;
        let newest_first = self.rest.fetch_messages(conversation, limit).await?;
        let events = self
            .state
            .write()
            .load_message_page(conversation, newest_first);
        self.forward(events);
        Ok(())
    }

    async fn load_recent_messages(&self, conversation: &ConversationId) -> Result<(), EngineError> {
        let limit = self.config.tuning.message_page_size;
        let newest_first = self.rest.fetch_messages(conversation, limit).await?;
        // This may complete after the user navigated away. Merging is still
        // correct — the page goes through the same reconciliation path and
        // never overwrites newer local state — so only log the staleness.
        if self.state.read().view().active() != Some(conversation) {
            tracing::debug!(conversation = %conversation, "message load completed after navigation");
        }
        let events = self
            .state
            .write()
            .load_message_page(conversation, newest_first);
        self.forward(events);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Background plumbing
    // -----------------------------------------------------------------------

    async fn handle_bus_event(&self, signal: BusEvent) {
        match signal {
            BusEvent::Event(event) => {
                let events = self.state.write().ingest(event, Timestamp::now());
                let mut discovered = None;
                for event in &events {
                    if let SyncEvent::ConversationDiscovered(conversation) = event {
                        discovered = Some(conversation.clone());
                    }
                }
                self.forward(events);
                if let Some(conversation) = discovered
                    && let Err(err) = self.refresh_conversations().await
                {
                    tracing::warn!(
                        conversation = %conversation,
                        error = %err,
                        "snapshot refetch for discovered conversation failed"
                    );
                }
            }
            BusEvent::StateChanged(state) => {
                self.forward(vec![SyncEvent::ConnectionChanged(state)]);
            }
            BusEvent::ResyncNeeded => self.resync().await,
        }
    }

    /// Reconnect-triggered refetch: the outage window may have swallowed
    /// events, so the conversation list and the active thread are reloaded
    /// over REST instead of trusting socket-only state.
    async fn resync(&self) {
        self.forward(vec![SyncEvent::ResyncStarted]);
        if let Err(err) = self.refresh_conversations().await {
            tracing::warn!(error = %err, "resync conversation refetch failed");
        }
        let active = self.state.read().view().active().cloned();
        if let Some(conversation) = active {
            let _ = self
                .bus
                .emit(&ClientEvent::JoinConversation {
                    conversation_id: conversation.clone(),
                })
                .await;
            if let Err(err) = self.load_recent_messages(&conversation).await {
                tracing::warn!(
                    conversation = %conversation,
                    error = %err,
                    "resync message refetch failed"
                );
            }
        }
        self.forward(vec![SyncEvent::ResyncCompleted]);
    }

    /// One sweep: expire remote typing indicators and flush the local
    /// reporter's pending stop.
    async fn sweep(&self, now: Timestamp) {
        let events = self.state.write().expire_typing(now);
        self.forward(events);
        let stop = self.reporter.lock().tick(now);
        if let Some(event) = stop {
            let _ = self.bus.emit(&event).await;
        }
    }

    fn forward(&self, events: Vec<SyncEvent>) {
        for event in events {
            if self.event_tx.try_send(event).is_err() {
                tracing::warn!("engine event buffer full, dropping notification");
            }
        }
    }
}

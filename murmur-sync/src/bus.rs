//! Event-bus adapter over the push channel.
//!
//! One process-scoped bus wraps the raw [`PushChannel`]: it decodes the
//! channel's signal stream into typed per-kind subscriptions, exposes a
//! `watch`-based connection-state signal, and raises [`BusEvent::ResyncNeeded`]
//! after every reconnect — events from the outage window may have been
//! missed, so socket-only state must not be trusted until a fresh REST fetch.
//!
//! Views never subscribe to the raw channel; they either consume the engine's
//! event stream or take a typed subscription here. Unsubscribing is dropping
//! the receiver — closed subscriptions are pruned during dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use murmur_proto::event::{ClientEvent, EventKind, PushEvent};

use crate::transport::{ConnectionState, PushChannel, PushError, PushSignal};

/// What the bus hands to the engine's pump loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A decoded push event.
    Event(PushEvent),
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// The channel reconnected after an outage; affected state must be
    /// refetched over REST.
    ResyncNeeded,
}

/// Process-scoped adapter between the push channel and the engine.
pub struct EventBus<P: PushChannel> {
    push: Arc<P>,
    subscriptions: parking_lot::Mutex<HashMap<EventKind, Vec<mpsc::Sender<PushEvent>>>>,
    state_tx: watch::Sender<ConnectionState>,
    subscription_buffer: usize,
}

impl<P: PushChannel + 'static> EventBus<P> {
    /// Wraps a push channel. The pump is not running yet — call
    /// [`spawn_pump`](Self::spawn_pump) from within a runtime.
    #[must_use]
    pub fn new(push: Arc<P>, subscription_buffer: usize) -> Arc<Self> {
        let (state_tx, _) = watch::channel(push.state());
        Arc::new(Self {
            push,
            subscriptions: parking_lot::Mutex::new(HashMap::new()),
            state_tx,
            subscription_buffer,
        })
    }

    /// Spawns the pump task, returning the engine-facing signal stream and
    /// the task handle (aborted on engine stop).
    #[must_use]
    pub fn spawn_pump(
        self: &Arc<Self>,
        event_buffer: usize,
    ) -> (mpsc::Receiver<BusEvent>, tokio::task::JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let pump_bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            pump_bus.pump(event_tx).await;
        });
        (event_rx, handle)
    }

    /// Wraps a push channel and spawns the pump task in one step.
    #[must_use]
    pub fn start(
        push: Arc<P>,
        event_buffer: usize,
        subscription_buffer: usize,
    ) -> (
        Arc<Self>,
        mpsc::Receiver<BusEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let bus = Self::new(push, subscription_buffer);
        let (event_rx, handle) = bus.spawn_pump(event_buffer);
        (bus, event_rx, handle)
    }

    /// Emits an outbound event over the push channel.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::NotConnected`] while the channel is down, or
    /// [`PushError::Closed`] once it has shut down for good.
    pub async fn emit(&self, event: &ClientEvent) -> Result<(), PushError> {
        self.push.emit(event).await
    }

    /// Current connection state of the underlying channel.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.push.state()
    }

    /// A watchable connection-state signal for non-blocking UI indicators.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Opens a typed subscription for one event kind.
    ///
    /// Dropping the returned receiver unsubscribes; the bus prunes closed
    /// subscriptions on the next dispatch of that kind.
    #[must_use]
    pub fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<PushEvent> {
        let (tx, rx) = mpsc::channel(self.subscription_buffer);
        self.subscriptions.lock().entry(kind).or_default().push(tx);
        rx
    }

    /// Pump loop: drains the push channel until it closes or the engine
    /// drops its receiver.
    async fn pump(&self, event_tx: mpsc::Sender<BusEvent>) {
        let mut saw_outage = false;
        loop {
            match self.push.recv().await {
                Ok(PushSignal::Event(event)) => {
                    self.dispatch(&event);
                    if event_tx.send(BusEvent::Event(event)).await.is_err() {
                        break;
                    }
                }
                Ok(PushSignal::State(state)) => {
                    let _ = self.state_tx.send(state);
                    if event_tx.send(BusEvent::StateChanged(state)).await.is_err() {
                        break;
                    }
                    match state {
                        ConnectionState::Connected if saw_outage => {
                            saw_outage = false;
                            tracing::info!("push channel reconnected, requesting resync");
                            if event_tx.send(BusEvent::ResyncNeeded).await.is_err() {
                                break;
                            }
                        }
                        ConnectionState::Connected => {}
                        ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                            saw_outage = true;
                        }
                    }
                }
                Err(PushError::Closed) => {
                    tracing::info!("push channel closed, bus pump exiting");
                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                    let _ = event_tx
                        .send(BusEvent::StateChanged(ConnectionState::Disconnected))
                        .await;
                    break;
                }
                Err(err) => {
                    // Transient receive errors are logged and skipped; a
                    // malformed frame must not stall the stream.
                    tracing::warn!(error = %err, "push receive error, skipping");
                }
            }
        }
    }

    /// Fans an event out to its kind's subscribers, pruning closed ones.
    fn dispatch(&self, event: &PushEvent) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(subscribers) = subscriptions.get_mut(&event.kind()) {
            subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(kind = %event.kind(), "slow subscriber, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }
}

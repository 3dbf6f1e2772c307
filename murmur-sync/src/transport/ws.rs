//! WebSocket push channel.
//!
//! Implements [`PushChannel`] over a WebSocket connection carrying one JSON
//! event per text frame. A supervisor task owns the connection: it pumps
//! frames both ways while the socket is healthy, and on loss it retries with
//! bounded exponential backoff, surfacing `Reconnecting`/`Connected` state
//! transitions so the adapter layer can trigger a resync.
//!
//! The server never sees engine state — only encoded [`ClientEvent`] frames
//! go out, and only [`PushEvent`] frames are accepted in. Malformed frames
//! are logged and skipped; bad data must not drop the connection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use murmur_proto::codec;
use murmur_proto::event::ClientEvent;

use super::{ConnectionState, PushChannel, PushError, PushSignal};
use crate::config::ReconnectConfig;

/// Type alias for the connected WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a WebSocket session ended.
enum SessionEnd {
    /// The local side dropped the channel; do not reconnect.
    ClientGone,
    /// The socket closed or errored; reconnect.
    ConnectionLost,
}

/// WebSocket-backed [`PushChannel`] with automatic reconnection.
pub struct WsPushChannel {
    /// Outbound events, consumed by the supervisor task.
    outbound: mpsc::Sender<ClientEvent>,
    /// Inbound signals produced by the supervisor task.
    inbound: tokio::sync::Mutex<mpsc::Receiver<PushSignal>>,
    /// Current connection state, shared with the supervisor.
    state: Arc<parking_lot::Mutex<ConnectionState>>,
    /// Handle to the supervisor task (kept for the channel's lifetime).
    _supervisor: tokio::task::JoinHandle<()>,
}

impl WsPushChannel {
    /// Connects to a push endpoint (`ws://` or `wss://`).
    ///
    /// The initial connection is made eagerly so configuration errors
    /// surface here; later losses are retried in the background with
    /// exponential backoff per `reconnect`.
    ///
    /// # Errors
    ///
    /// - [`PushError::Io`] for an invalid URL or a refused/failed handshake.
    /// - [`PushError::NotConnected`] if the initial attempt times out.
    pub async fn connect(url: &str, reconnect: ReconnectConfig) -> Result<Self, PushError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| PushError::Io(std::io::Error::other(format!("invalid push URL: {e}"))))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(PushError::Io(std::io::Error::other(format!(
                "unsupported push URL scheme: {}",
                parsed.scheme()
            ))));
        }

        let ws = match tokio::time::timeout(reconnect.connect_timeout, connect_async(url)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                tracing::warn!(url, error = %e, "push WebSocket connect failed");
                return Err(PushError::Io(std::io::Error::other(e.to_string())));
            }
            Err(_) => {
                tracing::warn!(url, "push WebSocket connect timed out");
                return Err(PushError::NotConnected);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let state = Arc::new(parking_lot::Mutex::new(ConnectionState::Connected));

        let supervisor = tokio::spawn(supervise(
            url.to_string(),
            reconnect,
            ws,
            outbound_rx,
            inbound_tx,
            Arc::clone(&state),
        ));

        Ok(Self {
            outbound: outbound_tx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            state,
            _supervisor: supervisor,
        })
    }
}

impl PushChannel for WsPushChannel {
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

/// Supervisor task: run sessions, reconnect between them.
async fn supervise(
    url: String,
    config: ReconnectConfig,
    mut ws: WsStream,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    inbound_tx: mpsc::Sender<PushSignal>,
    state: Arc<parking_lot::Mutex<ConnectionState>>,
) {
    loop {
        match run_session(ws, &mut outbound_rx, &inbound_tx).await {
            SessionEnd::ClientGone => {
                tracing::debug!("push channel dropped, supervisor exiting");
                return;
            }
            SessionEnd::ConnectionLost => {}
        }

        *state.lock() = ConnectionState::Reconnecting;
        if inbound_tx
            .send(PushSignal::State(ConnectionState::Reconnecting))
            .await
            .is_err()
        {
            return;
        }

        let mut delay = config.initial_delay;
        ws = loop {
            tokio::time::sleep(delay).await;
            if inbound_tx.is_closed() {
                return;
            }
            match tokio::time::timeout(config.connect_timeout, connect_async(&url)).await {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(e)) => {
                    tracing::warn!(url = %url, error = %e, delay = ?delay, "push reconnect failed");
                }
                Err(_) => {
                    tracing::warn!(url = %url, delay = ?delay, "push reconnect timed out");
                }
            }
            delay = (delay * 2).min(config.max_delay);
        };

        tracing::info!(url = %url, "push channel reconnected");
        *state.lock() = ConnectionState::Connected;
        if inbound_tx
            .send(PushSignal::State(ConnectionState::Connected))
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Pumps one WebSocket session until the socket dies or the client goes
/// away.
async fn run_session(
    ws: WsStream,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    inbound_tx: &mpsc::Sender<PushSignal>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(event) => match codec::encode_client(&event) {
                    Ok(frame) => {
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            tracing::warn!("push send failed, connection lost");
                            return SessionEnd::ConnectionLost;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode outbound event, skipping");
                    }
                },
                None => {
                    let _ = sink.close().await;
                    return SessionEnd::ClientGone;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match codec::decode_push(text.as_str()) {
                    Ok(event) => {
                        if inbound_tx.send(PushSignal::Event(event)).await.is_err() {
                            return SessionEnd::ClientGone;
                        }
                    }
                    Err(e) => {
                        // Malformed frame — log and skip, never disconnect.
                        tracing::warn!(error = %e, "malformed push frame, skipping");
                    }
                },
                Some(Ok(Message::Close(_))) => {
                    tracing::info!("push WebSocket closed by server");
                    return SessionEnd::ConnectionLost;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!("unexpected binary push frame, skipping");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Keepalive and raw frames are transport noise.
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "push WebSocket read error");
                    return SessionEnd::ConnectionLost;
                }
                None => {
                    tracing::info!("push WebSocket stream ended");
                    return SessionEnd::ConnectionLost;
                }
            },
        }
    }
}

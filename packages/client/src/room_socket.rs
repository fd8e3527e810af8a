//! Room WebSocket connection with reconnect and heartbeat.
//!
//! A [`RoomSocket`] owns at most one live WebSocket per room. Unexpected
//! closes and failed attempts are retried after an escalating delay; every
//! inbound frame that parses as JSON is handed to the message handler.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::{
    config::{ClientConfig, build_socket_url},
    dto::websocket::OutboundMessage,
    error::ConfigError,
    reconnect::ConnectionMachine,
};

pub use crate::reconnect::ReadyState;

/// Callback receiving every inbound frame that parses as JSON
pub type MessageHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Handle to the room WebSocket. Clones share the same connection.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct RoomSocket {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: String,
    heartbeat_interval: Duration,
    handler: MessageHandler,
    state_tx: watch::Sender<ReadyState>,
    shared: Mutex<Shared>,
}

struct Shared {
    machine: ConnectionMachine,
    /// Bumped on every connect/disconnect; tasks of older generations are stale
    generation: u64,
    identity: Option<(String, String)>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl RoomSocket {
    /// Create a closed socket. The WebSocket base URL is validated here so
    /// that `connect` cannot fail later.
    pub fn new<F>(config: &ClientConfig, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        build_socket_url(&config.ws_url, "", "")?;

        let (state_tx, _) = watch::channel(ReadyState::Closed);
        Ok(Self {
            inner: Arc::new(Inner {
                base_url: config.ws_url.clone(),
                heartbeat_interval: config.heartbeat_interval,
                handler: Arc::new(handler),
                state_tx,
                shared: Mutex::new(Shared {
                    machine: ConnectionMachine::new(config.reconnect_delays.clone()),
                    generation: 0,
                    identity: None,
                    outbound: None,
                    task: None,
                }),
            }),
        })
    }

    /// Connect to `room` as `device_id`.
    ///
    /// A no-op when a connection for the same identity is already open or in
    /// flight; any other connection is discarded first.
    pub fn connect(&self, room: &str, device_id: &str) {
        let url = match build_socket_url(&self.inner.base_url, room, device_id) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Cannot build room URL: {}", e);
                return;
            }
        };

        let mut shared = self.inner.lock();
        let same_identity = shared
            .identity
            .as_ref()
            .is_some_and(|(r, d)| r == room && d == device_id);
        if same_identity && !shared.machine.is_stopped() {
            tracing::debug!("Already connected or connecting to room '{}'", room);
            return;
        }

        self.inner.release(&mut shared);
        shared.identity = Some((room.to_string(), device_id.to_string()));
        shared.machine.start();
        let generation = shared.generation;
        self.inner.publish(&shared);

        tracing::info!("Connecting to room '{}' as '{}'", room, device_id);
        shared.task = Some(tokio::spawn(run_connection(
            Arc::downgrade(&self.inner),
            url,
            generation,
        )));
    }

    /// Send a JSON-serializable message.
    ///
    /// Returns `false` when the socket is not open or the message could not
    /// be serialized or queued.
    pub fn send<T>(&self, message: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let shared = self.inner.lock();
        if shared.machine.state() != ReadyState::Open {
            return false;
        }
        let Some(outbound) = shared.outbound.as_ref() else {
            return false;
        };

        match serde_json::to_string(message) {
            Ok(json) => outbound.send(Message::Text(json.into())).is_ok(),
            Err(e) => {
                tracing::warn!("Failed to serialize room message: {}", e);
                false
            }
        }
    }

    /// Close the socket and cancel all timers. No reconnect happens until the
    /// next `connect`.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        if shared.identity.take().is_some() {
            tracing::info!("Disconnecting from room");
        }
        self.inner.release(&mut shared);
        self.inner.publish(&shared);
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.inner.state_tx.borrow()
    }

    /// Watch `ready_state` transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ReadyState> {
        self.inner.state_tx.subscribe()
    }

    /// Consecutive failed attempts since the last successful open
    pub fn retry_count(&self) -> u32 {
        self.inner.lock().machine.retry_count()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, shared: &Shared) {
        self.state_tx.send_replace(shared.machine.state());
    }

    /// Stop the machine and let go of the current connection task.
    fn release(&self, shared: &mut Shared) {
        shared.machine.stop();
        shared.generation = shared.generation.wrapping_add(1);

        match (shared.outbound.take(), shared.task.take()) {
            // Let the open connection flush a close frame; its generation is
            // stale so it exits right after.
            (Some(outbound), Some(task)) => {
                if outbound.send(Message::Close(None)).is_err() {
                    task.abort();
                }
            }
            (_, Some(task)) => task.abort(),
            _ => {}
        }
    }

    /// Run `f` on the shared state if `generation` is still current.
    fn with_current<R>(&self, generation: u64, f: impl FnOnce(&mut Shared) -> R) -> Option<R> {
        let mut shared = self.lock();
        if shared.generation != generation {
            return None;
        }
        let result = f(&mut shared);
        self.publish(&shared);
        Some(result)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = shared.task.take() {
            task.abort();
        }
    }
}

/// Connection loop of one generation: connect, serve, back off, repeat.
async fn run_connection(inner: Weak<Inner>, url: Url, generation: u64) {
    loop {
        let (handler, heartbeat_interval) = {
            let Some(strong) = inner.upgrade() else {
                return;
            };
            match strong.with_current(generation, |shared| shared.machine.begin_attempt()) {
                Some(true) => {}
                _ => return,
            }
            (Arc::clone(&strong.handler), strong.heartbeat_interval)
        };

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let opened = inner.upgrade().and_then(|strong| {
                    strong.with_current(generation, |shared| {
                        shared.machine.on_open();
                        shared.outbound = Some(outbound_tx);
                    })
                });
                if opened.is_none() {
                    return;
                }
                tracing::info!("Connected to room server");

                serve_connection(
                    &inner,
                    generation,
                    ws_stream,
                    outbound_rx,
                    handler,
                    heartbeat_interval,
                )
                .await;
            }
            Err(e) => {
                tracing::warn!("Room connection attempt failed: {}", e);
            }
        }

        let delay = inner.upgrade().and_then(|strong| {
            strong.with_current(generation, |shared| {
                shared.outbound = None;
                shared.machine.on_close()
            })
        });
        let Some(Some(delay)) = delay else {
            return;
        };

        tracing::info!("Disconnected; reconnecting in {} ms", delay.as_millis());
        tokio::time::sleep(delay).await;
    }
}

/// Pump frames in both directions until the connection ends.
async fn serve_connection<S>(
    inner: &Weak<Inner>,
    generation: u64,
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    handler: MessageHandler,
    heartbeat_interval: Duration,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    let ping = match serde_json::to_string(&OutboundMessage::Ping) {
        Ok(json) => json,
        Err(_) => String::from(r#"{"type":"ping"}"#),
    };

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch_frame(&handler, text.as_bytes()),
                Some(Ok(Message::Binary(data))) => dispatch_frame(&handler, &data),
                Some(Ok(Message::Close(_))) => {
                    tracing::info!("Room server closed the connection");
                    if let Some(strong) = inner.upgrade() {
                        strong.with_current(generation, |shared| shared.machine.on_closing());
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Room socket read error: {}", e);
                    break;
                }
                None => break,
            },
            message = outbound_rx.recv() => match message {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = write.send(message).await {
                        tracing::warn!("Failed to send room message: {}", e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if let Err(e) = write.send(Message::Text(ping.clone().into())).await {
                    tracing::debug!("Heartbeat send failed: {}", e);
                } else {
                    tracing::debug!("Heartbeat sent");
                }
            }
        }
    }
}

fn dispatch_frame(handler: &MessageHandler, payload: &[u8]) {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => handler(value),
        Err(_) => tracing::trace!("Dropping non-JSON room frame ({} bytes)", payload.len()),
    }
}

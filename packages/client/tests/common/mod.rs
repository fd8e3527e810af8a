//! Test doubles shared by the integration tests: an in-process room server
//! and a polling helper.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{sync::mpsc, task::JoinHandle};

/// How the mock room answers `join`
#[derive(Debug, Clone)]
pub enum JoinReply {
    Accept,
    Reject(&'static str),
    Ignore,
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    room: String,
    device_id: String,
}

/// A frame the room received from a client
#[derive(Debug, Clone)]
pub struct Received {
    pub device_id: String,
    pub value: Value,
}

struct Connection {
    room: String,
    device_id: String,
    tx: mpsc::UnboundedSender<Message>,
}

struct RoomState {
    connections: Mutex<Vec<Connection>>,
    /// `(room, device_id)` of every accepted connection, in order
    accepted: Mutex<Vec<(String, String)>>,
    received_tx: mpsc::UnboundedSender<Received>,
    join_reply: Mutex<JoinReply>,
}

/// In-process room server speaking the room protocol over axum WebSockets
pub struct MockRoom {
    pub addr: SocketAddr,
    state: Arc<RoomState>,
    received_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Received>>,
    task: JoinHandle<()>,
}

impl MockRoom {
    pub async fn start() -> Self {
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RoomState {
            connections: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
            received_tx,
            join_reply: Mutex::new(JoinReply::Accept),
        });

        let app = Router::new()
            .route("/ws", get(websocket_handler))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            received_rx: tokio::sync::Mutex::new(received_rx),
            task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn set_join_reply(&self, reply: JoinReply) {
        *self.state.join_reply.lock().unwrap() = reply;
    }

    /// `(room, device_id)` of every connection accepted so far
    pub fn accepted(&self) -> Vec<(String, String)> {
        self.state.accepted.lock().unwrap().clone()
    }

    pub fn open_connections(&self) -> usize {
        let mut connections = self.state.connections.lock().unwrap();
        connections.retain(|c| !c.tx.is_closed());
        connections.len()
    }

    /// Send a text frame to every open connection
    pub fn broadcast_text(&self, text: &str) {
        for connection in self.state.connections.lock().unwrap().iter() {
            let _ = connection.tx.send(Message::Text(text.to_string().into()));
        }
    }

    pub fn broadcast(&self, value: &Value) {
        self.broadcast_text(&value.to_string());
    }

    /// Close every open connection from the server side
    pub fn close_all(&self) {
        for connection in self.state.connections.lock().unwrap().drain(..) {
            let _ = connection.tx.send(Message::Close(None));
        }
    }

    /// Next frame a client sent, skipping heartbeats unless `type` is "ping"
    pub async fn next_received(&self, frame_type: &str) -> Received {
        let mut rx = self.received_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let received = rx.recv().await.unwrap();
                if received.value["type"] == frame_type {
                    return received;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no '{frame_type}' frame received"))
    }
}

impl Drop for MockRoom {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RoomState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: Arc<RoomState>, query: ConnectQuery) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    state
        .accepted
        .lock()
        .unwrap()
        .push((query.room.clone(), query.device_id.clone()));
    state.connections.lock().unwrap().push(Connection {
        room: query.room.clone(),
        device_id: query.device_id.clone(),
        tx,
    });

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Message::Close(frame)) => {
                    let _ = sender.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    if sender.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    if value["type"] == "join" {
                        let reply = state.join_reply.lock().unwrap().clone();
                        let answer = match reply {
                            JoinReply::Accept => Some(json!({"type": "join_ok", "role": value["role"]})),
                            JoinReply::Reject(reason) => Some(json!({"type": "join_error", "reason": reason})),
                            JoinReply::Ignore => None,
                        };
                        if let Some(answer) = answer
                            && sender.send(Message::Text(answer.to_string().into())).await.is_err()
                        {
                            break;
                        }
                    }
                    let _ = state.received_tx.send(Received {
                        device_id: query.device_id.clone(),
                        value,
                    });
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

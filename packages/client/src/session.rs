//! One device's participation in a room.
//!
//! [`RoomSession`] owns the room socket and the preview selector of a single
//! device and routes every inbound frame to the right place: photo
//! announcements and roster updates feed the selector, capture requests from
//! other devices become [`SessionEvent`]s, pings are answered and join
//! replies complete the pending handshake.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use hondacamera_shared::time::Clock;

use crate::{
    config::ClientConfig,
    dto::websocket::{InboundMessage, OutboundMessage},
    error::{ConfigError, JoinRejection},
    photo::PhotoCandidate,
    room_socket::{ReadyState, RoomSocket},
    roster::{Role, RosterSnapshot},
    selector::LatestPhotoSelector,
};

/// Something the application should react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Another device asked everyone to take a photo
    TakePhoto {
        origin_device_id: String,
        ts: Option<f64>,
    },
    /// The room's role assignment changed
    RosterChanged(RosterSnapshot),
}

/// Sender half of the local "photo just captured" channel
pub type CaptureSender = mpsc::UnboundedSender<PhotoCandidate>;

type PendingJoin = Arc<Mutex<Option<oneshot::Sender<Result<Role, JoinRejection>>>>>;

/// A device connected to one room
pub struct RoomSession {
    room: String,
    device_id: String,
    socket: RoomSocket,
    selector: Arc<LatestPhotoSelector>,
    clock: Arc<dyn Clock>,
    join_timeout: Duration,
    pending_join: PendingJoin,
    capture_tx: CaptureSender,
    dispatch: JoinHandle<()>,
}

impl RoomSession {
    /// Connect `device_id` to `room`, judging previews as `role` until a
    /// join says otherwise.
    ///
    /// Returns the session and the stream of [`SessionEvent`]s.
    pub fn start(
        config: &ClientConfig,
        room: &str,
        device_id: &str,
        role: Role,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), ConfigError> {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let socket = RoomSocket::new(config, move |value| {
            // Receiver gone means the session is shutting down
            let _ = frame_tx.send(value);
        })?;

        let selector = Arc::new(LatestPhotoSelector::new(
            device_id,
            role,
            config.preview_debounce,
            Arc::clone(&clock),
        ));
        let pending_join: PendingJoin = Arc::new(Mutex::new(None));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            device_id: device_id.to_string(),
            socket: socket.clone(),
            selector: Arc::clone(&selector),
            clock: Arc::clone(&clock),
            pending_join: Arc::clone(&pending_join),
            events_tx,
        };
        let dispatch = tokio::spawn(dispatcher.run(frame_rx, capture_rx));

        socket.connect(room, device_id);

        Ok((
            Self {
                room: room.to_string(),
                device_id: device_id.to_string(),
                socket,
                selector,
                clock,
                join_timeout: config.join_timeout,
                pending_join,
                capture_tx,
                dispatch,
            },
            events_rx,
        ))
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Ask the room for `role` and wait for its answer.
    ///
    /// Fails with `NotConnected` when the socket is not open and with
    /// `Timeout` when no answer arrives within the join timeout. On success
    /// the preview policy switches to the granted role.
    pub async fn join(&self, role: Role) -> Result<Role, JoinRejection> {
        if self.socket.ready_state() != ReadyState::Open {
            return Err(JoinRejection::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        *lock_pending(&self.pending_join) = Some(tx);

        if !self.socket.send(&OutboundMessage::Join { role }) {
            lock_pending(&self.pending_join).take();
            return Err(JoinRejection::NotConnected);
        }
        tracing::debug!("Join requested as {}", role);

        match tokio::time::timeout(self.join_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Replaced by a newer join
            Ok(Err(_)) => Err(JoinRejection::NotConnected),
            Err(_) => {
                lock_pending(&self.pending_join).take();
                tracing::warn!("Join as {} timed out", role);
                Err(JoinRejection::Timeout)
            }
        }
    }

    /// Broadcast a capture request to the other devices of the room.
    ///
    /// Returns `false` when the socket is not open.
    pub fn request_capture(&self) -> bool {
        self.socket.send(&OutboundMessage::TakePhoto {
            origin_device_id: self.device_id.clone(),
            ts: self.clock.now_millis(),
        })
    }

    /// Report a photo this device just captured and uploaded
    pub fn local_capture(&self, candidate: PhotoCandidate) {
        if self.capture_tx.send(candidate).is_err() {
            tracing::warn!("Session dispatch stopped; dropping local capture");
        }
    }

    /// Channel for capture code that outlives a borrow of the session
    pub fn capture_sender(&self) -> CaptureSender {
        self.capture_tx.clone()
    }

    /// Watch the debounced preview
    pub fn preview(&self) -> watch::Receiver<Option<PhotoCandidate>> {
        self.selector.subscribe()
    }

    pub fn selector(&self) -> &LatestPhotoSelector {
        &self.selector
    }

    pub fn ready_state(&self) -> ReadyState {
        self.socket.ready_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReadyState> {
        self.socket.subscribe_state()
    }

    /// Leave the room. The session stays usable for inspection only.
    pub fn shutdown(&self) {
        self.socket.disconnect();
        lock_pending(&self.pending_join).take();
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.socket.disconnect();
        self.dispatch.abort();
    }
}

fn lock_pending(
    pending: &PendingJoin,
) -> MutexGuard<'_, Option<oneshot::Sender<Result<Role, JoinRejection>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes inbound frames and local captures
struct Dispatcher {
    device_id: String,
    socket: RoomSocket,
    selector: Arc<LatestPhotoSelector>,
    clock: Arc<dyn Clock>,
    pending_join: PendingJoin,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Dispatcher {
    async fn run(
        self,
        mut frame_rx: mpsc::UnboundedReceiver<serde_json::Value>,
        mut capture_rx: mpsc::UnboundedReceiver<PhotoCandidate>,
    ) {
        loop {
            tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(value) => self.handle_frame(value),
                    None => break,
                },
                Some(candidate) = capture_rx.recv() => self.handle_capture(candidate),
            }
        }
        tracing::debug!("Session dispatch finished");
    }

    fn handle_frame(&self, value: serde_json::Value) {
        let Some(message) = InboundMessage::decode(value) else {
            return;
        };

        match message {
            InboundMessage::PhotoUploaded(photo) => {
                match PhotoCandidate::from_uploaded(&photo, self.clock.now_millis()) {
                    Some(candidate) => {
                        tracing::debug!(
                            "Photo {} from {} (seq {})",
                            photo.picture_id,
                            candidate.device_id,
                            candidate.sequence
                        );
                        self.selector.ingest(candidate);
                    }
                    None => tracing::debug!(
                        "Ignoring photo_uploaded {} without usable image path",
                        photo.picture_id
                    ),
                }
            }
            InboundMessage::RosterUpdate(update) => {
                let roster = RosterSnapshot::from(update);
                self.selector.ingest_roster(roster.clone());
                self.emit(SessionEvent::RosterChanged(roster));
            }
            InboundMessage::TakePhoto(request) => {
                if request.origin_device_id == self.device_id {
                    tracing::debug!("Ignoring own take_photo echo");
                    return;
                }
                self.emit(SessionEvent::TakePhoto {
                    origin_device_id: request.origin_device_id,
                    ts: request.ts,
                });
            }
            InboundMessage::Ping => {
                if !self.socket.send(&OutboundMessage::Pong) {
                    tracing::debug!("Could not answer ping");
                }
            }
            InboundMessage::JoinOk(ok) => {
                tracing::info!("Joined room as {}", ok.role);
                self.selector.set_role(ok.role);
                self.complete_join(Ok(ok.role));
            }
            InboundMessage::JoinError(error) => {
                let reason = error
                    .reason
                    .parse::<JoinRejection>()
                    .unwrap_or(JoinRejection::InvalidRole);
                tracing::warn!("Join rejected: {}", reason);
                self.complete_join(Err(reason));
            }
            InboundMessage::Pong | InboundMessage::Unknown => {}
        }
    }

    fn handle_capture(&self, candidate: PhotoCandidate) {
        tracing::debug!("Local capture seq {}", candidate.sequence);
        self.selector.ingest(candidate);
    }

    fn complete_join(&self, result: Result<Role, JoinRejection>) {
        match lock_pending(&self.pending_join).take() {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::debug!("Join reply without a pending join"),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events_tx.send(event).is_err() {
            tracing::trace!("No session event listener");
        }
    }
}

//! Client execution: resolve the room, join it and drive the prompt.

use std::{path::PathBuf, sync::Arc};

use tokio::sync::mpsc;

use hondacamera_shared::time::{Clock, SystemClock};

use crate::{
    api::ApiClient,
    config::ClientConfig,
    error::{ClientError, JoinRejection},
    formatter::PreviewFormatter,
    image_fetch::{ImageFetcher, ObjectUrl},
    photo::PhotoCandidate,
    room_socket::ReadyState,
    roster::Role,
    session::{CaptureSender, RoomSession, SessionEvent},
    store::{FileStore, KeyValueStore, device_id as load_device_id},
};

use super::{
    command::{Command, HELP},
    preview_image::PreviewImage,
    ui::{redisplay_prompt, spawn_line_reader},
};

/// Everything the binary collects from its arguments
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub ws_url: String,
    pub api_url: String,
    pub room: Option<String>,
    pub role: Role,
    pub device_id: Option<String>,
    pub store_path: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Run the interactive client until the user quits
pub async fn run_client(options: RunOptions) -> Result<(), ClientError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&options.store_path)?);
    let device_id = match options.device_id.clone() {
        Some(id) => id,
        None => load_device_id(store.as_ref())?,
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = ClientConfig {
        ws_url: options.ws_url.clone(),
        api_url: options.api_url.clone(),
        ..ClientConfig::default()
    };

    let api = ApiClient::new(&config.api_url, Arc::clone(&store), Arc::clone(&clock))?;
    if let (Some(username), Some(password)) = (&options.username, &options.password) {
        api.login(username, password).await?;
    }

    let room = match options.room.clone() {
        Some(room) => room,
        None if api.is_authenticated() => api.me().await?.room_id(),
        None => return Err(ClientError::MissingRoom),
    };

    tracing::info!("Device '{}' entering room '{}'", device_id, room);
    let (session, mut events) =
        RoomSession::start(&config, &room, &device_id, options.role, Arc::clone(&clock))?;
    let session = Arc::new(session);

    let fetcher = Arc::new(ImageFetcher::new(
        Arc::new(api.clone()),
        config.max_concurrent_fetches,
    ));
    let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel::<(String, ObjectUrl)>();
    let (join_tx, mut join_rx) = mpsc::unbounded_channel();
    let mut preview_image = PreviewImage::new();

    let prompt = format!("{}@{}> ", device_id, room);
    println!(
        "\nYou are '{}' ({}). Type 'help' for commands.\n",
        device_id, options.role
    );
    let mut input_rx = spawn_line_reader(prompt.clone());
    let mut state_rx = session.subscribe_state();
    let mut preview_rx = session.preview();

    let result = loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = *state_rx.borrow_and_update();
                print!("{}", PreviewFormatter::format_ready_state(state));
                redisplay_prompt(&prompt);

                // The room forgets roles across connections
                if state == ReadyState::Open {
                    let session = Arc::clone(&session);
                    let join_tx = join_tx.clone();
                    let role = options.role;
                    tokio::spawn(async move {
                        let _ = join_tx.send(session.join(role).await);
                    });
                }
            }
            Some(joined) = join_rx.recv() => match joined {
                Ok(role) => {
                    println!("\n* joined as {}", role);
                    redisplay_prompt(&prompt);
                }
                // Retried on the next open
                Err(reason @ (JoinRejection::NotConnected | JoinRejection::Timeout)) => {
                    tracing::warn!("Join did not complete: {}", reason);
                }
                Err(reason) => break Err(ClientError::Join(reason)),
            },
            changed = preview_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let preview = preview_rx.borrow_and_update().clone();
                print!("{}", PreviewFormatter::format_preview(preview.as_ref(), &device_id));
                redisplay_prompt(&prompt);

                let wanted = preview
                    .filter(|_| api.is_authenticated())
                    .map(|candidate| candidate.image_path);
                if let Some(path) = preview_image.request(wanted) {
                    load_image(Arc::clone(&fetcher), path, loaded_tx.clone());
                }
            }
            Some((path, url)) = loaded_rx.recv() => {
                if let Some(url) = preview_image.complete(&path, url) {
                    let size = url.bytes().map(|b| b.len()).unwrap_or_default();
                    print!("{}", PreviewFormatter::format_image_loaded(url.as_str(), size));
                    redisplay_prompt(&prompt);
                }
            }
            Some(event) = events.recv() => {
                match event {
                    SessionEvent::TakePhoto { origin_device_id, ts } => {
                        print!("{}", PreviewFormatter::format_take_photo(&origin_device_id, ts));
                    }
                    SessionEvent::RosterChanged(roster) => {
                        print!("{}", PreviewFormatter::format_roster(&roster, &device_id));
                    }
                }
                redisplay_prompt(&prompt);
            }
            line = input_rx.recv() => {
                let Some(line) = line else {
                    break Ok(());
                };
                match Command::parse(&line) {
                    Command::Take => {
                        if !session.request_capture() {
                            println!("Not connected; capture request not sent");
                        }
                    }
                    Command::Upload(path) => upload(
                        api.clone(),
                        path,
                        device_id.clone(),
                        session.capture_sender(),
                    ),
                    Command::State => {
                        print!("{}", PreviewFormatter::format_ready_state(session.ready_state()));
                        print!(
                            "{}",
                            PreviewFormatter::format_preview(
                                session.selector().preview().as_ref(),
                                &device_id,
                            )
                        );
                    }
                    Command::Quit => break Ok(()),
                    Command::Help => print!("{}", HELP),
                    Command::Unknown(line) => println!("Unknown command '{}'; try 'help'", line),
                }
            }
        }
    };

    drop(preview_image);
    fetcher.close();
    session.shutdown();
    tracing::info!("Left room '{}'", room);
    result
}

fn load_image(
    fetcher: Arc<ImageFetcher>,
    path: String,
    loaded_tx: mpsc::UnboundedSender<(String, ObjectUrl)>,
) {
    tokio::spawn(async move {
        match fetcher.fetch(&path).await {
            Ok(url) => {
                let _ = loaded_tx.send((path, url));
            }
            Err(e) => tracing::warn!("Could not load preview image: {}", e),
        }
    });
}

/// Upload `path` and report it as a local capture once the backend accepts it
fn upload(
    api: ApiClient,
    path: PathBuf,
    device_id: String,
    capture_tx: CaptureSender,
) {
    tokio::spawn(async move {
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", path.display(), e);
                return;
            }
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());

        match api.upload_picture(&file_name, content, &device_id).await {
            Ok(uploaded) => {
                match PhotoCandidate::from_upload(&uploaded, &device_id) {
                    Some(candidate) => {
                        let _ = capture_tx.send(candidate);
                    }
                    None => tracing::debug!("Upload response cannot be previewed before the room echo"),
                }
            }
            Err(e) => tracing::warn!("Upload of {} failed: {}", path.display(), e),
        }
    });
}

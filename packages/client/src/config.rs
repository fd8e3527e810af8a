//! Client configuration and endpoint URL construction.

use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

/// Default WebSocket base endpoint
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/ws";
/// Default picture backend base URL
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
/// Path used when the WebSocket base carries no path
pub const DEFAULT_WS_PATH: &str = "/ws";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PREVIEW_DEBOUNCE: Duration = Duration::from_millis(1200);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONCURRENT_FETCHES: usize = 8;

/// Escalating reconnect delays; the last entry repeats for further failures
pub const RECONNECT_DELAYS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(15),
];

/// Runtime configuration shared by the room socket, the preview selector and
/// the backend client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket base endpoint (`ws://`, `wss://`, `http://` or `https://`)
    pub ws_url: String,
    /// Picture backend base URL
    pub api_url: String,
    /// Keep-alive ping interval while the socket is open
    pub heartbeat_interval: Duration,
    /// Reconnect delay table, indexed by consecutive failure count
    pub reconnect_delays: Vec<Duration>,
    /// Quiet period before a new preview is published
    pub preview_debounce: Duration,
    /// How long to wait for the answer to a join request
    pub join_timeout: Duration,
    /// Cap on concurrent authenticated image fetches
    pub max_concurrent_fetches: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect_delays: RECONNECT_DELAYS.to_vec(),
            preview_debounce: PREVIEW_DEBOUNCE,
            join_timeout: JOIN_TIMEOUT,
            max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
        }
    }
}

fn parse_url(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Build the room WebSocket URL.
///
/// `room` and `device_id` are appended as query parameters (existing query
/// parameters are kept). An `http(s)` base is switched to `ws(s)`, and the
/// path becomes `/ws` when the base has none.
pub fn build_socket_url(base: &str, room: &str, device_id: &str) -> Result<Url, ConfigError> {
    let mut url = parse_url(base)?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
    }

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_WS_PATH);
    }

    url.query_pairs_mut()
        .append_pair("room", room)
        .append_pair("device_id", device_id);

    Ok(url)
}

/// Resolve a backend path (e.g. `/api/pictures/12/image`) against the API base.
pub fn build_api_url(base: &str, path: &str) -> Result<Url, ConfigError> {
    let base = parse_url(base)?;
    match base.scheme() {
        "http" | "https" => {}
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
    base.join(path).map_err(|e| ConfigError::InvalidUrl {
        url: path.to_string(),
        reason: e.to_string(),
    })
}

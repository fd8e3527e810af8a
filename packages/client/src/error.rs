//! Error types for the HondaCamera client.

use std::{fmt, str::FromStr, sync::Arc};

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A base URL could not be parsed
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A URL uses a scheme the component cannot talk to
    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),
}

/// Errors returned by the picture backend client
#[derive(Debug, Error)]
pub enum ApiError {
    /// Not authenticated, or the single refresh-and-retry also failed
    #[error("Unauthorized")]
    Unauthorized,

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Request never produced a response
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the client-local key-value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
}

/// Errors that end the command-line client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The room refused the requested role
    #[error("Join rejected: {0}")]
    Join(JoinRejection),

    /// Neither a room nor credentials to look one up were given
    #[error("No room given; pass --room or log in with --username/--password")]
    MissingRoom,
}

/// Failure of a shared image fetch, cloneable so every waiter gets a copy
#[derive(Debug, Clone, Error)]
pub enum ImageFetchError {
    #[error("Image fetch failed: {0}")]
    Source(Arc<ApiError>),

    /// The fetcher was shut down while the request was queued
    #[error("Image fetcher closed")]
    Closed,
}

/// Reason a join handshake did not succeed.
///
/// The wire representation is the snake_case reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinRejection {
    InvalidRole,
    RecorderFull,
    ShooterFull,
    NotConnected,
    Timeout,
}

impl JoinRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinRejection::InvalidRole => "invalid_role",
            JoinRejection::RecorderFull => "recorder_full",
            JoinRejection::ShooterFull => "shooter_full",
            JoinRejection::NotConnected => "not_connected",
            JoinRejection::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JoinRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinRejection {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid_role" => Ok(JoinRejection::InvalidRole),
            "recorder_full" => Ok(JoinRejection::RecorderFull),
            "shooter_full" => Ok(JoinRejection::ShooterFull),
            "not_connected" => Ok(JoinRejection::NotConnected),
            "timeout" => Ok(JoinRejection::Timeout),
            _ => Err(()),
        }
    }
}

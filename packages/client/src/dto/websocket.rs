//! WebSocket frame DTOs for the room protocol.
//!
//! Every frame is a JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};

use crate::roster::Role;

/// Frames received from the room server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    TakePhoto(TakePhotoMessage),
    PhotoUploaded(PhotoUploadedMessage),
    RosterUpdate(RosterUpdateMessage),
    JoinOk(JoinOkMessage),
    JoinError(JoinErrorMessage),
    Ping,
    Pong,
    /// Any `type` this client does not know about
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Decode an already parsed JSON frame. Returns `None` when the value is
    /// not a well-formed room frame.
    pub fn decode(value: serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::trace!("Dropping malformed room frame: {}", e);
                None
            }
        }
    }
}

/// Request for every device other than the origin to take a photo
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TakePhotoMessage {
    pub origin_device_id: String,
    #[serde(default)]
    pub ts: Option<f64>,
}

/// Announcement of a newly uploaded photo
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhotoUploadedMessage {
    #[serde(default)]
    pub seq: Option<f64>,
    pub picture_id: i64,
    pub device_id: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub pictured_at: Option<String>,
}

/// Current role assignment of the room
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RosterUpdateMessage {
    #[serde(default)]
    pub recorder: Option<String>,
    #[serde(default)]
    pub shooters: Vec<String>,
    #[serde(default)]
    pub counts: RoleCounts,
}

/// Number of devices holding each role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounts {
    #[serde(default)]
    pub recorder: u32,
    #[serde(default)]
    pub shooter: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinOkMessage {
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinErrorMessage {
    pub reason: String,
}

/// Frames sent to the room server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    TakePhoto { origin_device_id: String, ts: i64 },
    Join { role: Role },
    Ping,
    Pong,
}

//! Photo candidates for the latest-photo preview.
//!
//! This module contains pure functions that turn wire notifications into
//! comparable candidates, making them easy to test.

use reqwest::Url;

use hondacamera_shared::time::parse_rfc3339_millis;

use crate::dto::{http::UploadResponse, websocket::PhotoUploadedMessage};

/// A photo that may become the room's preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoCandidate {
    /// Ordering key; higher is newer
    pub sequence: i64,
    /// Device that captured the photo
    pub device_id: String,
    /// Same-origin relative path of the full image
    pub image_path: String,
    pub captured_at: Option<String>,
    pub picture_id: Option<i64>,
}

impl PhotoCandidate {
    /// Build a candidate from a `photo_uploaded` frame.
    ///
    /// Returns `None` when the frame carries no usable image path.
    pub fn from_uploaded(message: &PhotoUploadedMessage, received_at_millis: i64) -> Option<Self> {
        let image_path =
            normalize_image_path(message.image_path.as_deref(), message.image_url.as_deref())?;
        if message.device_id.trim().is_empty() {
            return None;
        }

        Some(Self {
            sequence: derive_sequence(
                message.seq,
                message.pictured_at.as_deref(),
                received_at_millis,
            ),
            device_id: message.device_id.clone(),
            image_path,
            captured_at: message.pictured_at.clone(),
            picture_id: Some(message.picture_id),
        })
    }

    /// Build the local optimistic candidate for this device's own upload,
    /// before the room broadcast comes back.
    ///
    /// Only an upload with a parseable `pictured_at` qualifies. A receipt-time
    /// key would sit far above the small explicit `seq` values the room may
    /// send, and the device's later broadcast photos could never overtake it.
    pub fn from_upload(response: &UploadResponse, own_device_id: &str) -> Option<Self> {
        let captured_millis = response
            .pictured_at
            .as_deref()
            .and_then(parse_rfc3339_millis)?;
        let image_path = normalize_image_path(response.image_path.as_deref(), None)
            .or_else(|| normalize_image_path(Some(&picture_image_path(response.picture_id)), None))?;
        let device_id = response
            .device_id
            .clone()
            .unwrap_or_else(|| own_device_id.to_string());

        Some(Self {
            sequence: captured_millis,
            device_id,
            image_path,
            captured_at: response.pictured_at.clone(),
            picture_id: Some(response.picture_id),
        })
    }
}

/// Backend path of a picture's full image
pub fn picture_image_path(picture_id: i64) -> String {
    format!("/api/pictures/{}/image", picture_id)
}

/// Derive the ordering key of a photo.
///
/// Explicit sequence first, then the parsed capture timestamp, then the
/// local receipt time. The receipt-time fallback is not comparable across
/// devices with skewed clocks; it is kept because the room server may omit
/// both other fields.
pub fn derive_sequence(
    seq: Option<f64>,
    pictured_at: Option<&str>,
    received_at_millis: i64,
) -> i64 {
    if let Some(seq) = seq.filter(|s| s.is_finite()) {
        return seq as i64;
    }

    pictured_at
        .and_then(parse_rfc3339_millis)
        .unwrap_or(received_at_millis)
}

/// Reduce an image reference to a same-origin relative path.
///
/// `image_path` wins over `image_url`. Absolute `http(s)` URLs are reduced to
/// their path and query. Empty values, protocol-relative URLs, other schemes
/// and values containing whitespace are rejected.
pub fn normalize_image_path(image_path: Option<&str>, image_url: Option<&str>) -> Option<String> {
    let raw = [image_path, image_url]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())?;

    if raw.chars().any(char::is_whitespace) || raw.starts_with("//") {
        return None;
    }

    if raw.starts_with('/') {
        return Some(raw.to_string());
    }

    match Url::parse(raw) {
        Ok(url) => match url.scheme() {
            "http" | "https" => {
                let mut path = url.path().to_string();
                if let Some(query) = url.query() {
                    path.push('?');
                    path.push_str(query);
                }
                Some(path)
            }
            _ => None,
        },
        // Relative without leading slash
        Err(_) => Some(format!("/{}", raw)),
    }
}

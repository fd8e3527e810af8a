//! HTTP request/response DTOs for the picture backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Bearer + refresh token pair returned by login, signup and refresh
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Identity returned by `GET /auth/me`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeResponse {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub account_id: Option<i64>,
}

impl MeResponse {
    /// Room shared by every device of this account
    pub fn room_id(&self) -> String {
        format!("acc:{}", self.account_id.unwrap_or(self.id))
    }
}

/// `GET /api/pictures/dates` answers either a bare list or `{"dates": [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DatesResponse {
    Wrapped { dates: Vec<String> },
    Bare(Vec<String>),
}

impl DatesResponse {
    pub fn into_dates(self) -> Vec<String> {
        match self {
            DatesResponse::Wrapped { dates } => dates,
            DatesResponse::Bare(dates) => dates,
        }
    }
}

/// Photo metadata as listed by `GET /api/pictures/by-date`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PictureRecord {
    #[serde(alias = "picture_id")]
    pub id: i64,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub pictured_at: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub trip_id: Option<i64>,
}

/// `GET /api/pictures/by-date` answers either a bare list or `{"pictures": [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PicturesResponse {
    Wrapped { pictures: Vec<PictureRecord> },
    Bare(Vec<PictureRecord>),
}

impl PicturesResponse {
    pub fn into_pictures(self) -> Vec<PictureRecord> {
        match self {
            PicturesResponse::Wrapped { pictures } => pictures,
            PicturesResponse::Bare(pictures) => pictures,
        }
    }
}

/// Result of `POST /api/pictures`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadResponse {
    pub picture_id: i64,
    pub thumbnail_path: String,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub pictured_at: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

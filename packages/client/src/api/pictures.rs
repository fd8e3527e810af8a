//! Picture endpoints.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use crate::{
    dto::http::{DatesResponse, PictureRecord, PicturesResponse, UploadResponse},
    error::ApiError,
    image_fetch::ImageSource,
    photo::picture_image_path,
};

use super::{ApiClient, decode_json};

impl ApiClient {
    /// `GET /api/pictures/dates`: dates that have photos, in backend order
    pub async fn picture_dates(&self, trip_id: Option<i64>) -> Result<Vec<String>, ApiError> {
        let url = self.url("/api/pictures/dates")?;
        let query: Vec<(&str, String)> = trip_id
            .map(|id| vec![("trip_id", id.to_string())])
            .unwrap_or_default();

        let response = self
            .send_authorized(|http| http.get(url.clone()).query(&query))
            .await?;
        let dates: DatesResponse = decode_json(response).await?;
        Ok(dates.into_dates())
    }

    /// `GET /api/pictures/by-date`
    pub async fn pictures_by_date(
        &self,
        date: &str,
        trip_id: Option<i64>,
        thumb_width: Option<u32>,
    ) -> Result<Vec<PictureRecord>, ApiError> {
        let url = self.url("/api/pictures/by-date")?;
        let mut query = vec![("date", date.to_string())];
        if let Some(id) = trip_id {
            query.push(("trip_id", id.to_string()));
        }
        if let Some(width) = thumb_width {
            query.push(("thumb_w", width.to_string()));
        }

        let response = self
            .send_authorized(|http| http.get(url.clone()).query(&query))
            .await?;
        let pictures: PicturesResponse = decode_json(response).await?;
        Ok(pictures.into_pictures())
    }

    /// `POST /api/pictures` as multipart (`file`, `device_id`)
    pub async fn upload_picture(
        &self,
        file_name: &str,
        content: Vec<u8>,
        device_id: &str,
    ) -> Result<UploadResponse, ApiError> {
        let url = self.url("/api/pictures")?;
        let mime = mime_for(file_name);

        let response = self
            .send_authorized(|http| {
                let part = Part::bytes(content.clone()).file_name(file_name.to_string());
                let part = match part.mime_str(mime) {
                    Ok(part) => part,
                    Err(_) => Part::bytes(content.clone()).file_name(file_name.to_string()),
                };
                let form = Form::new()
                    .part("file", part)
                    .text("device_id", device_id.to_string());
                http.post(url.clone()).multipart(form)
            })
            .await?;

        let uploaded: UploadResponse = decode_json(response).await?;
        tracing::info!("Uploaded picture {}", uploaded.picture_id);
        Ok(uploaded)
    }

    /// `DELETE /api/pictures/{id}`
    pub async fn delete_picture(&self, picture_id: i64) -> Result<(), ApiError> {
        let url = self.url(&format!("/api/pictures/{}", picture_id))?;
        self.send_authorized(|http| http.delete(url.clone())).await?;
        tracing::info!("Deleted picture {}", picture_id);
        Ok(())
    }

    /// `GET /api/pictures/{id}/image`
    pub async fn picture_image(&self, picture_id: i64) -> Result<Vec<u8>, ApiError> {
        self.fetch_bytes(&picture_image_path(picture_id)).await
    }

    /// `GET /api/pictures/{id}/thumbnail?w=`
    pub async fn picture_thumbnail(
        &self,
        picture_id: i64,
        width: Option<u32>,
    ) -> Result<Vec<u8>, ApiError> {
        let path = match width {
            Some(w) => format!("/api/pictures/{}/thumbnail?w={}", picture_id, w),
            None => format!("/api/pictures/{}/thumbnail", picture_id),
        };
        self.fetch_bytes(&path).await
    }

    /// Authenticated GET of a same-origin path, returning the raw body
    pub async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.url(path)?;
        let response = self.send_authorized(|http| http.get(url.clone())).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageSource for ApiClient {
    async fn fetch_image(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        self.fetch_bytes(path).await
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

//! HTTP client for the picture backend.
//!
//! Provides [`ApiClient`], which attaches the bearer token to authenticated
//! calls, persists tokens through a [`TokenStore`], and on a 401 performs
//! exactly one refresh-and-retry.

mod auth;
mod pictures;

use std::{sync::Arc, time::Duration};

use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use hondacamera_shared::time::Clock;

use crate::{
    config::build_api_url,
    error::ApiError,
    store::{KeyValueStore, TokenStore, Tokens},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed client for the picture backend
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
    clock: Arc<dyn Clock>,
}

impl ApiClient {
    /// Create a client for `base_url` persisting tokens in `store`.
    pub fn new(
        base_url: &str,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiError> {
        build_api_url(base_url, "/")?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            tokens: TokenStore::new(store),
            clock,
        })
    }

    /// Whether tokens are stored (they may still be rejected by the backend)
    pub fn is_authenticated(&self) -> bool {
        matches!(self.tokens.load(), Ok(Some(_)))
    }

    /// Forget the stored tokens
    pub fn logout(&self) -> Result<(), ApiError> {
        self.tokens.clear()?;
        Ok(())
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(build_api_url(&self.base_url, path)?)
    }

    /// Send an authenticated request built by `build`.
    ///
    /// An expired token is refreshed before sending. A 401 triggers one
    /// refresh-and-retry unless a refresh already happened for this call.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut tokens = self.tokens.load()?.ok_or(ApiError::Unauthorized)?;
        let mut refreshed = false;

        if tokens.is_expired(self.clock.now_millis()) {
            tracing::debug!("Access token expired, refreshing before request");
            tokens = self.refresh().await?;
            refreshed = true;
        }

        loop {
            let response = build(&self.http)
                .bearer_auth(&tokens.access_token)
                .send()
                .await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return error_for_status(response).await;
            }

            if refreshed {
                tracing::warn!("Request rejected after token refresh");
                self.tokens.clear()?;
                return Err(ApiError::Unauthorized);
            }

            tracing::debug!("Request unauthorized, refreshing token and retrying once");
            tokens = self.refresh().await?;
            refreshed = true;
        }
    }

    fn store_tokens(&self, tokens: Tokens) -> Result<Tokens, ApiError> {
        self.tokens.save(&tokens)?;
        Ok(tokens)
    }
}

/// Turn a non-success response into [`ApiError::Status`].
async fn error_for_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!("Backend returned {}: {}", status, body);
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

//! Authentication endpoints.

use reqwest::StatusCode;

use crate::{
    dto::http::{LoginRequest, MeResponse, RefreshRequest, SignupRequest, TokenResponse},
    error::ApiError,
    store::Tokens,
};

use super::{ApiClient, decode_json, error_for_status};

impl ApiClient {
    /// `POST /auth/login`; stores the returned tokens
    pub async fn login(&self, username: &str, password: &str) -> Result<Tokens, ApiError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url("/auth/login")?)
            .json(&request)
            .send()
            .await?;

        let tokens = self.accept_tokens(response).await?;
        tracing::info!("Logged in as '{}'", username);
        Ok(tokens)
    }

    /// `POST /auth/signup`; stores the returned tokens
    pub async fn signup(
        &self,
        username: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Tokens, ApiError> {
        let request = SignupRequest {
            username: username.to_string(),
            password: password.to_string(),
            display_name: display_name.map(str::to_string),
        };
        let response = self
            .http
            .post(self.url("/auth/signup")?)
            .json(&request)
            .send()
            .await?;

        self.accept_tokens(response).await
    }

    /// `POST /auth/refresh` with the stored refresh token.
    ///
    /// A rejected refresh clears the stored tokens.
    pub async fn refresh(&self) -> Result<Tokens, ApiError> {
        let current = self.tokens.load()?.ok_or(ApiError::Unauthorized)?;
        let request = RefreshRequest {
            refresh_token: current.refresh_token,
        };
        let response = self
            .http
            .post(self.url("/auth/refresh")?)
            .json(&request)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            tracing::warn!("Token refresh rejected, clearing stored tokens");
            self.tokens.clear()?;
            return Err(ApiError::Unauthorized);
        }

        self.accept_tokens(response).await
    }

    /// `GET /auth/me`
    pub async fn me(&self) -> Result<MeResponse, ApiError> {
        let url = self.url("/auth/me")?;
        let response = self.send_authorized(|http| http.get(url.clone())).await?;
        decode_json(response).await
    }

    async fn accept_tokens(&self, response: reqwest::Response) -> Result<Tokens, ApiError> {
        let response = error_for_status(response).await?;
        let body: TokenResponse = decode_json(response).await?;
        let expires_at = body
            .expires_in
            .map(|secs| self.clock.now_millis().saturating_add(secs.saturating_mul(1000)));

        self.store_tokens(Tokens {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at,
        })
    }
}

//! OAuth token operations: refresh, authorization-code exchange and
//! profile lookup for the sign-in flow.

use async_trait::async_trait;
use calmirror_core::error::RemoteError;
use calmirror_core::remote::{RefreshedTokens, TokenRefresher};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::client::GoogleCalendar;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self) -> Result<RefreshedTokens, RemoteError> {
        if let Some(error) = self.error {
            let detail = self.error_description.unwrap_or_default();
            // invalid_grant means the refresh token itself was revoked.
            return Err(if error == "invalid_grant" {
                RemoteError::AuthExpired
            } else {
                RemoteError::Unavailable(format!("token endpoint error: {error} {detail}"))
            });
        }
        if self.access_token.is_empty() {
            return Err(RemoteError::Unavailable(
                "token endpoint returned no access token".to_string(),
            ));
        }
        Ok(RefreshedTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
        })
    }
}

/// The signed-in account, as reported by the userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

impl GoogleCalendar {
    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<RefreshedTokens, RemoteError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("failed to parse token response: {e}")))?;
        tokens.into_tokens()
    }

    /// Exchange an authorization code for tokens (sign-in flow).
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<RefreshedTokens, RemoteError> {
        self.token_request(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    /// Identify the account behind an access token.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<GoogleProfile, RemoteError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if response.status().as_u16() == 401 {
            return Err(RemoteError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(RemoteError::Unavailable(format!(
                "userinfo failed: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("failed to parse userinfo: {e}")))
    }
}

#[async_trait]
impl TokenRefresher for GoogleCalendar {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RemoteError> {
        debug!("refreshing access token");
        self.token_request(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }
}

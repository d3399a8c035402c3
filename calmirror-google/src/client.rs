//! Calendar v3 REST client implementing the `RemoteCalendar` port.
//!
//! Clients hold no credentials: every call takes the access token it
//! should run as, so a single client instance serves all users without
//! any shared mutable auth state.

use std::time::Duration;

use async_trait::async_trait;
use calmirror_core::error::RemoteError;
use calmirror_core::event::{EventDraft, EventPatch, RemoteEvent};
use calmirror_core::remote::{RemoteCalendar, WatchRegistration};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::convert::{from_google, merge_patch, to_google, GoogleEvent};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Listing page size. Calendars in this domain are small; a single
/// page is sufficient.
const MAX_RESULTS: &str = "100";

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Bound on every remote call; an exceeded bound fails with
    /// `RemoteError::Timeout` instead of hanging the caller.
    pub timeout: Duration,
    /// Lifetime requested for webhook channels.
    pub channel_ttl: Duration,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        GoogleConfig {
            client_id: String::new(),
            client_secret: String::new(),
            timeout: Duration::from_secs(10),
            channel_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct GoogleCalendar {
    pub(crate) http: reqwest::Client,
    pub(crate) config: GoogleConfig,
    api_base: String,
    pub(crate) token_url: String,
    pub(crate) userinfo_url: String,
}

impl GoogleCalendar {
    pub fn new(config: GoogleConfig) -> Result<Self, reqwest::Error> {
        Self::with_base_urls(config, API_BASE, TOKEN_URL, USERINFO_URL)
    }

    /// Construct against alternative endpoints. Used by tests to point
    /// the client at a local mock server.
    pub fn with_base_urls(
        config: GoogleConfig,
        api_base: &str,
        token_url: &str,
        userinfo_url: &str,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(GoogleCalendar {
            http,
            config,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            userinfo_url: userinfo_url.to_string(),
        })
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/primary/events", self.api_base)
    }

    fn event_url(&self, external_id: &str) -> String {
        format!("{}/{}", self.events_url(), external_id)
    }

    pub(crate) fn map_send_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.config.timeout.as_secs())
        } else {
            RemoteError::Unavailable(err.to_string())
        }
    }

    /// Map non-success statuses to the error taxonomy.
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 => RemoteError::AuthExpired,
            404 | 410 => RemoteError::NotFound,
            429 => RemoteError::RateLimited,
            // Calendar reports quota exhaustion as 403 with a reason
            // in the body.
            403 if body.contains("ateLimitExceeded") => RemoteError::RateLimited,
            _ => RemoteError::Unavailable(format!("{status}: {body}")),
        })
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("failed to parse response: {e}")))
    }

    async fn fetch_event(
        &self,
        access_token: &str,
        external_id: &str,
    ) -> Result<GoogleEvent, RemoteError> {
        let response = self
            .http
            .get(self.event_url(external_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.parse(self.check(response).await?).await
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListResponse {
    items: Vec<GoogleEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    id: String,
    resource_id: String,
    /// Epoch milliseconds, as a string on the wire.
    expiration: String,
}

#[async_trait]
impl RemoteCalendar for GoogleCalendar {
    async fn list_events(&self, access_token: &str) -> Result<Vec<RemoteEvent>, RemoteError> {
        let response = self
            .http
            .get(self.events_url())
            .bearer_auth(access_token)
            .query(&[
                ("maxResults", MAX_RESULTS),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let listing: ListResponse = self.parse(self.check(response).await?).await?;
        debug!(count = listing.items.len(), "listed remote events");
        Ok(listing.items.into_iter().filter_map(from_google).collect())
    }

    async fn create_event(
        &self,
        access_token: &str,
        draft: &EventDraft,
    ) -> Result<RemoteEvent, RemoteError> {
        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(access_token)
            .json(&to_google(draft))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let created: GoogleEvent = self.parse(self.check(response).await?).await?;
        from_google(created)
            .ok_or_else(|| RemoteError::Unavailable("created event came back unusable".to_string()))
    }

    async fn update_event(
        &self,
        access_token: &str,
        external_id: &str,
        patch: &EventPatch,
    ) -> Result<RemoteEvent, RemoteError> {
        // Full-payload update: fetch the current remote state, merge
        // the patch, and PUT the result.
        let existing = self.fetch_event(access_token, external_id).await?;
        let merged = merge_patch(existing, patch);

        let response = self
            .http
            .put(self.event_url(external_id))
            .bearer_auth(access_token)
            .json(&merged)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let updated: GoogleEvent = self.parse(self.check(response).await?).await?;
        from_google(updated)
            .ok_or_else(|| RemoteError::Unavailable("updated event came back unusable".to_string()))
    }

    async fn delete_event(
        &self,
        access_token: &str,
        external_id: &str,
    ) -> Result<(), RemoteError> {
        let response = self
            .http
            .delete(self.event_url(external_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn register_watch(
        &self,
        access_token: &str,
        channel_id: &str,
        callback_url: &str,
    ) -> Result<WatchRegistration, RemoteError> {
        let response = self
            .http
            .post(format!("{}/watch", self.events_url()))
            .bearer_auth(access_token)
            .json(&json!({
                "id": channel_id,
                "type": "web_hook",
                "address": callback_url,
                "params": { "ttl": self.config.channel_ttl.as_secs().to_string() },
            }))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let watch: WatchResponse = self.parse(self.check(response).await?).await?;
        let millis: i64 = watch.expiration.parse().map_err(|_| {
            RemoteError::Unavailable(format!("bad watch expiration: {}", watch.expiration))
        })?;
        let expiration = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            RemoteError::Unavailable(format!("bad watch expiration: {}", watch.expiration))
        })?;

        Ok(WatchRegistration {
            channel_id: watch.id,
            resource_id: watch.resource_id,
            expiration,
        })
    }

    async fn cancel_watch(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(format!("{}/channels/stop", self.api_base))
            .bearer_auth(access_token)
            .json(&json!({ "id": channel_id, "resourceId": resource_id }))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.check(response).await?;
        Ok(())
    }
}

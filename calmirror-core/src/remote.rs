//! Port traits for the remote calendar service.
//!
//! Implemented by `calmirror-google` against the Calendar v3 REST API;
//! the sync core only sees these traits. Every method takes the access
//! token per call: clients are never shared across users, so a stale
//! or foreign credential cannot leak between accounts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::event::{EventDraft, EventPatch, RemoteEvent};

/// Result of registering a push-notification watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRegistration {
    pub channel_id: String,
    pub resource_id: String,
    pub expiration: DateTime<Utc>,
}

/// Typed operations against the external calendar, authenticated per
/// call. All calls carry a bounded timeout in the implementation.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    async fn list_events(&self, access_token: &str) -> Result<Vec<RemoteEvent>, RemoteError>;

    async fn create_event(
        &self,
        access_token: &str,
        draft: &EventDraft,
    ) -> Result<RemoteEvent, RemoteError>;

    async fn update_event(
        &self,
        access_token: &str,
        external_id: &str,
        patch: &EventPatch,
    ) -> Result<RemoteEvent, RemoteError>;

    async fn delete_event(&self, access_token: &str, external_id: &str)
        -> Result<(), RemoteError>;

    async fn register_watch(
        &self,
        access_token: &str,
        channel_id: &str,
        callback_url: &str,
    ) -> Result<WatchRegistration, RemoteError>;

    async fn cancel_watch(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), RemoteError>;
}

/// Tokens returned by a successful refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// The provider typically does not rotate the refresh token; when
    /// it does, the new one must replace the stored one.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RemoteError>;
}

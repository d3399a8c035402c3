//! Port traits for the local persistence layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::MirrorEvent;
use crate::user::{User, WebhookChannel};

/// CRUD over the persisted event mirror, keyed by
/// `(user_id, external_event_id)`.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// All mirror events for a user, ordered by start time.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<MirrorEvent>, StoreError>;

    async fn find(
        &self,
        user_id: Uuid,
        external_event_id: &str,
    ) -> Result<Option<MirrorEvent>, StoreError>;

    /// Insert or overwrite by `(user_id, external_event_id)`. Returns
    /// the stored row with its assigned id.
    async fn upsert(&self, event: &MirrorEvent) -> Result<MirrorEvent, StoreError>;

    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError>;
}

/// Persistence for user credential and webhook channel records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn all(&self) -> Result<Vec<User>, StoreError>;

    /// Insert a new user, or update tokens on the existing record for
    /// the same Google account. Returns the stored user.
    async fn upsert_by_google_id(
        &self,
        google_id: &str,
        email: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<User, StoreError>;

    /// Persist refreshed credentials. `refresh_token` is the full new
    /// value, not a delta.
    async fn save_tokens(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn save_channel(
        &self,
        user_id: Uuid,
        channel: &WebhookChannel,
    ) -> Result<(), StoreError>;

    async fn clear_channel(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Owner of a webhook channel, if the channel is still registered.
    async fn find_by_channel(&self, channel_id: &str) -> Result<Option<User>, StoreError>;

    /// Users whose channel expiration is at or before `cutoff`.
    async fn channels_expiring_by(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError>;
}

//! User credential and webhook channel records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A connected Google account with its stored OAuth credentials and,
/// when push notifications are set up, its webhook channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub google_id: String,
    pub email: String,
    pub access_token: String,
    /// Absent for accounts that authenticated without offline access;
    /// refresh then fails explicitly with `CredentialMissing`.
    pub refresh_token: Option<String>,
    /// At most one channel per user.
    pub channel: Option<WebhookChannel>,
}

impl User {
    /// The user's channel, if one exists and has not expired. A channel
    /// past its expiration is treated as absent.
    pub fn active_channel(&self, now: DateTime<Utc>) -> Option<&WebhookChannel> {
        self.channel.as_ref().filter(|ch| !ch.is_expired_at(now))
    }
}

/// A time-limited push-notification subscription registered with the
/// remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub expiration: DateTime<Utc>,
}

impl WebhookChannel {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user_with_channel(expiration: DateTime<Utc>) -> User {
        User {
            id: Uuid::new_v4(),
            google_id: "g-1".to_string(),
            email: "a@example.com".to_string(),
            access_token: "token".to_string(),
            refresh_token: None,
            channel: Some(WebhookChannel {
                channel_id: "ch-1".to_string(),
                resource_id: "res-1".to_string(),
                expiration,
            }),
        }
    }

    #[test]
    fn expired_channel_is_treated_as_absent() {
        let now = Utc::now();
        assert!(user_with_channel(now - Duration::seconds(1))
            .active_channel(now)
            .is_none());
        assert!(user_with_channel(now).active_channel(now).is_none());
        assert!(user_with_channel(now + Duration::hours(1))
            .active_channel(now)
            .is_some());
    }
}

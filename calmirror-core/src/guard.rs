//! Credential guard: wraps remote calls with a single-retry-on-auth-expiry
//! policy.
//!
//! Exactly one refresh is attempted per call. A second `AuthExpired`
//! after a successful refresh is surfaced as terminal, so a revoked
//! grant cannot be masked by an infinite refresh loop.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::TokenRefresher;
use crate::store::UserStore;

pub struct CredentialGuard {
    users: Arc<dyn UserStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl CredentialGuard {
    pub fn new(users: Arc<dyn UserStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        CredentialGuard { users, refresher }
    }

    /// Run `op` with the user's current access token. On `AuthExpired`,
    /// and only then: refresh once, persist the new tokens, retry once.
    ///
    /// The new credentials are persisted before the retry so a crash
    /// between refresh and retry does not lose them.
    pub async fn with_authenticated_call<T, F, Fut>(
        &self,
        user_id: Uuid,
        mut op: F,
    ) -> SyncResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or(SyncError::UserNotFound(user_id))?;

        if user.access_token.is_empty() {
            return Err(SyncError::CredentialMissing);
        }

        match op(user.access_token.clone()).await {
            Ok(value) => Ok(value),
            Err(RemoteError::AuthExpired) => {
                let refresh_token = user
                    .refresh_token
                    .as_deref()
                    .ok_or(SyncError::CredentialMissing)?;

                debug!(user = %user_id, "access token expired, refreshing");
                let refreshed = self
                    .refresher
                    .refresh(refresh_token)
                    .await
                    .map_err(SyncError::Remote)?;

                // Keep the old refresh token unless the provider rotated it.
                let kept_refresh = refreshed
                    .refresh_token
                    .as_deref()
                    .unwrap_or(refresh_token)
                    .to_string();
                self.users
                    .save_tokens(user_id, &refreshed.access_token, Some(&kept_refresh))
                    .await?;

                op(refreshed.access_token).await.map_err(SyncError::Remote)
            }
            Err(err) => Err(SyncError::Remote(err)),
        }
    }
}

//! Event mutation gateway for user-initiated creates, updates and
//! deletes.
//!
//! Every mutation goes to the remote service first; the mirror is only
//! written after the remote call succeeds, so the mirror can never run
//! ahead of the source of truth. A mirror write that fails after a
//! successful remote write leaves a transient inconsistency that the
//! next reconciliation repairs.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::event::{EventDraft, EventPatch, MirrorEvent};
use crate::guard::CredentialGuard;
use crate::remote::RemoteCalendar;
use crate::store::MirrorStore;

pub struct MutationGateway {
    guard: Arc<CredentialGuard>,
    remote: Arc<dyn RemoteCalendar>,
    mirror: Arc<dyn MirrorStore>,
}

impl MutationGateway {
    pub fn new(
        guard: Arc<CredentialGuard>,
        remote: Arc<dyn RemoteCalendar>,
        mirror: Arc<dyn MirrorStore>,
    ) -> Self {
        MutationGateway {
            guard,
            remote,
            mirror,
        }
    }

    pub async fn create_event(
        &self,
        user_id: Uuid,
        draft: EventDraft,
    ) -> SyncResult<MirrorEvent> {
        let created = self
            .guard
            .with_authenticated_call(user_id, {
                let remote = Arc::clone(&self.remote);
                let draft = draft.clone();
                move |token| {
                    let remote = Arc::clone(&remote);
                    let draft = draft.clone();
                    async move { remote.create_event(&token, &draft).await }
                }
            })
            .await?;

        let row = MirrorEvent::from_remote(user_id, &created.normalized());
        self.mirror_write(row).await
    }

    pub async fn update_event(
        &self,
        user_id: Uuid,
        external_id: &str,
        patch: EventPatch,
    ) -> SyncResult<MirrorEvent> {
        let updated = self
            .guard
            .with_authenticated_call(user_id, {
                let remote = Arc::clone(&self.remote);
                let external_id = external_id.to_string();
                let patch = patch.clone();
                move |token| {
                    let remote = Arc::clone(&remote);
                    let external_id = external_id.clone();
                    let patch = patch.clone();
                    async move { remote.update_event(&token, &external_id, &patch).await }
                }
            })
            .await?;

        let row = MirrorEvent::from_remote(user_id, &updated.normalized());
        self.mirror_write(row).await
    }

    pub async fn delete_event(&self, user_id: Uuid, external_id: &str) -> SyncResult<()> {
        let result = self
            .guard
            .with_authenticated_call(user_id, {
                let remote = Arc::clone(&self.remote);
                let external_id = external_id.to_string();
                move |token| {
                    let remote = Arc::clone(&remote);
                    let external_id = external_id.clone();
                    async move { remote.delete_event(&token, &external_id).await }
                }
            })
            .await;

        match result {
            Ok(()) => {}
            // Already gone remotely; deleting the mirror row is still
            // the right outcome.
            Err(SyncError::Remote(RemoteError::NotFound)) => {}
            Err(err) => return Err(err),
        }

        if let Some(local) = self.mirror.find(user_id, external_id).await? {
            if let Err(err) = self.mirror.delete_by_id(local.id).await {
                warn!(user = %user_id, event = %external_id, error = %err, "mirror delete failed after remote delete, next sync repairs");
            }
        }
        Ok(())
    }

    /// Persist the mirror row for a mutation that already succeeded
    /// remotely. A store failure here is logged, not surfaced: the
    /// caller's mutation took effect and reconciliation converges the
    /// mirror.
    async fn mirror_write(&self, row: MirrorEvent) -> SyncResult<MirrorEvent> {
        match self.mirror.upsert(&row).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                warn!(user = %row.user_id, event = %row.external_event_id, error = %err, "mirror write failed after remote mutation, next sync repairs");
                Ok(row)
            }
        }
    }
}

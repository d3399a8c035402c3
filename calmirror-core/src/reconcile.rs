//! Reconciliation engine: diff the remote event set against the local
//! mirror and apply minimal corrective writes.
//!
//! The remote service is authoritative. Local-only rows are artifacts
//! of remote deletions and are removed; remote-only events are
//! mirrored; rows whose fingerprint diverged are overwritten. Equal
//! fingerprints produce no write, which is what makes repeated runs
//! idempotent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, SyncResult};
use crate::event::MirrorEvent;
use crate::guard::CredentialGuard;
use crate::remote::RemoteCalendar;
use crate::store::MirrorStore;

/// Kind of corrective write applied to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ApplyKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ApplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyKind::Create => write!(f, "+"),
            ApplyKind::Update => write!(f, "~"),
            ApplyKind::Delete => write!(f, "-"),
        }
    }
}

/// A per-event apply failure. These never abort the run; the affected
/// events stay inconsistent until the next trigger.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailure {
    pub external_event_id: String,
    pub kind: ApplyKind,
    pub error: String,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<ApplyFailure>,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        self.created > 0 || self.updated > 0 || self.deleted > 0
    }
}

/// One reconciliation run for a single user. The dispatcher only
/// depends on this seam.
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, user_id: Uuid) -> SyncResult<SyncReport>;
}

pub struct ReconcileEngine {
    guard: Arc<CredentialGuard>,
    remote: Arc<dyn RemoteCalendar>,
    mirror: Arc<dyn MirrorStore>,
}

#[async_trait::async_trait]
impl Reconciler for ReconcileEngine {
    async fn reconcile(&self, user_id: Uuid) -> SyncResult<SyncReport> {
        ReconcileEngine::reconcile(self, user_id).await
    }
}

impl ReconcileEngine {
    pub fn new(
        guard: Arc<CredentialGuard>,
        remote: Arc<dyn RemoteCalendar>,
        mirror: Arc<dyn MirrorStore>,
    ) -> Self {
        ReconcileEngine {
            guard,
            remote,
            mirror,
        }
    }

    /// Run one reconciliation for `user_id`.
    ///
    /// Aborts only when the remote or local listing itself fails; no
    /// partial diff is computed from a half-fetched state. Per-event
    /// apply failures are collected into the report instead.
    pub async fn reconcile(&self, user_id: Uuid) -> SyncResult<SyncReport> {
        let remote_events = self
            .guard
            .with_authenticated_call(user_id, {
                let remote = Arc::clone(&self.remote);
                move |token| {
                    let remote = Arc::clone(&remote);
                    async move { remote.list_events(&token).await }
                }
            })
            .await?;

        let local_events = self.mirror.list_by_user(user_id).await?;

        let normalized: Vec<_> = remote_events.iter().map(|e| e.normalized()).collect();
        let remote_by_id: HashMap<&str, _> =
            normalized.iter().map(|e| (e.id.as_str(), e)).collect();
        let local_by_id: HashMap<&str, &MirrorEvent> = local_events
            .iter()
            .map(|e| (e.external_event_id.as_str(), e))
            .collect();

        let mut report = SyncReport::default();

        // Local rows whose external id is gone from the remote listing.
        for local in &local_events {
            if remote_by_id.contains_key(local.external_event_id.as_str()) {
                continue;
            }
            match self.mirror.delete_by_id(local.id).await {
                // Already gone counts as deleted.
                Ok(()) | Err(StoreError::NotFound) => report.deleted += 1,
                Err(err) => report.failures.push(ApplyFailure {
                    external_event_id: local.external_event_id.clone(),
                    kind: ApplyKind::Delete,
                    error: err.to_string(),
                }),
            }
        }

        // Remote events missing locally, and fingerprint mismatches.
        for event in &normalized {
            match local_by_id.get(event.id.as_str()) {
                None => {
                    let row = MirrorEvent::from_remote(user_id, event);
                    match self.mirror.upsert(&row).await {
                        Ok(_) => report.created += 1,
                        Err(err) => report.failures.push(ApplyFailure {
                            external_event_id: event.id.clone(),
                            kind: ApplyKind::Create,
                            error: err.to_string(),
                        }),
                    }
                }
                Some(local) if local.fingerprint != event.fingerprint() => {
                    let mut row = (*local).clone();
                    row.apply_remote(event);
                    match self.mirror.upsert(&row).await {
                        Ok(_) => report.updated += 1,
                        Err(err) => report.failures.push(ApplyFailure {
                            external_event_id: event.id.clone(),
                            kind: ApplyKind::Update,
                            error: err.to_string(),
                        }),
                    }
                }
                // Fingerprints match: no write.
                Some(_) => {}
            }
        }

        debug!(
            user = %user_id,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            failures = report.failures.len(),
            "reconciliation finished"
        );
        Ok(report)
    }
}

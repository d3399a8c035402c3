//! Sync trigger dispatcher.
//!
//! Webhook notifications, the periodic timer and post-mutation requests
//! all funnel through [`SyncDispatcher::trigger`]. Per user, at most one
//! reconciliation is in flight; a trigger arriving mid-run is coalesced
//! into exactly one follow-up run, so a notification that lands during a
//! sync is never dropped. Cross-user runs proceed concurrently, bounded
//! by a semaphore to protect the remote service from burst load.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::reconcile::Reconciler;

/// Why a reconciliation was requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerReason {
    Webhook,
    Periodic,
    PostMutation,
    SignIn,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Webhook => write!(f, "webhook"),
            TriggerReason::Periodic => write!(f, "periodic"),
            TriggerReason::PostMutation => write!(f, "post-mutation"),
            TriggerReason::SignIn => write!(f, "sign-in"),
        }
    }
}

#[derive(Default)]
struct UserSyncState {
    pending: bool,
}

pub struct SyncDispatcher {
    engine: Arc<dyn Reconciler>,
    /// Presence of an entry means a run is in flight for that user.
    in_flight: Mutex<HashMap<Uuid, UserSyncState>>,
    permits: Arc<Semaphore>,
    accepting: AtomicBool,
}

impl SyncDispatcher {
    pub fn new(engine: Arc<dyn Reconciler>, max_concurrent: usize) -> Arc<Self> {
        Arc::new(SyncDispatcher {
            engine,
            in_flight: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            accepting: AtomicBool::new(true),
        })
    }

    /// Request a reconciliation for `user_id`. Returns immediately; the
    /// run happens on a spawned task.
    pub fn trigger(self: &Arc<Self>, user_id: Uuid, reason: TriggerReason) {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(user = %user_id, %reason, "shutting down, trigger dropped");
            return;
        }

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(state) = in_flight.get_mut(&user_id) {
                state.pending = true;
                debug!(user = %user_id, %reason, "sync in flight, trigger coalesced");
                return;
            }
            in_flight.insert(user_id, UserSyncState::default());
        }

        debug!(user = %user_id, %reason, "sync scheduled");
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.run_user(user_id).await });
    }

    /// Stop accepting triggers. In-flight runs finish; pending
    /// follow-ups are abandoned.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// True when no reconciliation is in flight for any user.
    pub fn is_idle(&self) -> bool {
        self.in_flight.lock().unwrap().is_empty()
    }

    async fn run_user(self: Arc<Self>, user_id: Uuid) {
        loop {
            {
                // unwrap safe: the semaphore is never closed
                let _permit = self.permits.acquire().await.unwrap();
                match self.engine.reconcile(user_id).await {
                    Ok(report) => {
                        if report.has_changes() || !report.failures.is_empty() {
                            info!(
                                user = %user_id,
                                created = report.created,
                                updated = report.updated,
                                deleted = report.deleted,
                                failures = report.failures.len(),
                                "sync applied changes"
                            );
                        }
                        for failure in &report.failures {
                            warn!(
                                user = %user_id,
                                event = %failure.external_event_id,
                                kind = %failure.kind,
                                error = %failure.error,
                                "event apply failed, will repair on next sync"
                            );
                        }
                    }
                    // Trigger-driven failures are logged only; the next
                    // trigger self-heals.
                    Err(err) => warn!(user = %user_id, error = %err, "sync run failed"),
                }
            }

            let run_again = {
                let mut in_flight = self.in_flight.lock().unwrap();
                match in_flight.get_mut(&user_id) {
                    Some(state) if state.pending && self.accepting.load(Ordering::SeqCst) => {
                        state.pending = false;
                        true
                    }
                    _ => {
                        in_flight.remove(&user_id);
                        false
                    }
                }
            };
            if !run_again {
                break;
            }
        }
    }
}

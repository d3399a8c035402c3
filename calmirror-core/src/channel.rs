//! Webhook channel manager.
//!
//! Keeps one valid push-notification channel registered per user,
//! renews channels before they lapse, and routes inbound notifications
//! into the sync dispatcher. Notifications are never reconciled inline:
//! the webhook-receiving path only looks up the owner and hands off.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatcher::{SyncDispatcher, TriggerReason};
use crate::error::{SyncError, SyncResult};
use crate::guard::CredentialGuard;
use crate::remote::RemoteCalendar;
use crate::store::UserStore;
use crate::user::WebhookChannel;

/// Resource state carried by a push notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceState {
    /// Initial-sync handshake sent right after registration.
    Sync,
    Exists,
    Update,
    NotExists,
}

impl ResourceState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sync" => Some(ResourceState::Sync),
            "exists" => Some(ResourceState::Exists),
            "update" => Some(ResourceState::Update),
            "not_exists" => Some(ResourceState::NotExists),
            _ => None,
        }
    }
}

/// Channel id derived from the user id plus the wall-clock millisecond
/// timestamp, so a retried registration does not collide with the one
/// it replaces. Registrations for one user are at least a remote round
/// trip apart, which keeps the timestamps distinct.
fn channel_id_for(user_id: Uuid, now: DateTime<Utc>) -> String {
    format!("channel-{}-{}", user_id, now.timestamp_millis())
}

pub struct ChannelManager {
    users: Arc<dyn UserStore>,
    remote: Arc<dyn RemoteCalendar>,
    guard: Arc<CredentialGuard>,
    dispatcher: Arc<SyncDispatcher>,
    /// Address the remote service pushes notifications to.
    callback_url: String,
    /// How often the renewal sweep runs; channels expiring within one
    /// interval are renewed. Must be shorter than the channel TTL.
    renewal_interval: Duration,
}

impl ChannelManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        remote: Arc<dyn RemoteCalendar>,
        guard: Arc<CredentialGuard>,
        dispatcher: Arc<SyncDispatcher>,
        callback_url: String,
        renewal_interval: Duration,
    ) -> Self {
        ChannelManager {
            users,
            remote,
            guard,
            dispatcher,
            callback_url,
            renewal_interval,
        }
    }

    /// Register a channel for the user unless a non-expired one already
    /// exists. Returns the active channel either way.
    pub async fn ensure_channel(&self, user_id: Uuid) -> SyncResult<WebhookChannel> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or(SyncError::UserNotFound(user_id))?;

        if let Some(channel) = user.active_channel(Utc::now()) {
            return Ok(channel.clone());
        }

        let channel_id = channel_id_for(user_id, Utc::now());
        let registration = self
            .guard
            .with_authenticated_call(user_id, {
                let remote = Arc::clone(&self.remote);
                let channel_id = channel_id.clone();
                let callback_url = self.callback_url.clone();
                move |token| {
                    let remote = Arc::clone(&remote);
                    let channel_id = channel_id.clone();
                    let callback_url = callback_url.clone();
                    async move {
                        remote
                            .register_watch(&token, &channel_id, &callback_url)
                            .await
                    }
                }
            })
            .await?;

        let channel = WebhookChannel {
            channel_id: registration.channel_id,
            resource_id: registration.resource_id,
            expiration: registration.expiration,
        };
        self.users.save_channel(user_id, &channel).await?;
        info!(user = %user_id, channel = %channel.channel_id, expiration = %channel.expiration, "webhook channel registered");
        Ok(channel)
    }

    /// Cancel the user's channel remotely and clear the persisted
    /// fields. A failed remote cancel is logged and the fields are
    /// cleared anyway: a dangling remote channel simply stops being
    /// renewed and lapses on its own.
    pub async fn stop_channel(&self, user_id: Uuid) -> SyncResult<()> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or(SyncError::UserNotFound(user_id))?;

        let Some(channel) = user.channel else {
            return Ok(());
        };

        if !channel.is_expired_at(Utc::now()) {
            let cancel = self
                .guard
                .with_authenticated_call(user_id, {
                    let remote = Arc::clone(&self.remote);
                    let channel = channel.clone();
                    move |token| {
                        let remote = Arc::clone(&remote);
                        let channel = channel.clone();
                        async move {
                            remote
                                .cancel_watch(&token, &channel.channel_id, &channel.resource_id)
                                .await
                        }
                    }
                })
                .await;
            if let Err(err) = cancel {
                warn!(user = %user_id, channel = %channel.channel_id, error = %err, "remote channel cancel failed, clearing local record anyway");
            }
        }

        self.users.clear_channel(user_id).await?;
        Ok(())
    }

    /// Route an inbound notification to its owning user. Notifications
    /// for unknown channels (stopped or superseded) are discarded
    /// without error.
    pub async fn handle_notification(
        &self,
        channel_id: &str,
        resource_state: ResourceState,
    ) -> SyncResult<()> {
        let Some(user) = self.users.find_by_channel(channel_id).await? else {
            debug!(channel = %channel_id, "notification for unknown channel, discarding");
            return Ok(());
        };

        match resource_state {
            ResourceState::Sync | ResourceState::Exists | ResourceState::Update => {
                self.dispatcher.trigger(user.id, TriggerReason::Webhook);
            }
            ResourceState::NotExists => {
                // The watched resource is gone; drop the channel record
                // and do not renew.
                info!(user = %user.id, channel = %channel_id, "watched resource gone, clearing channel");
                self.users.clear_channel(user.id).await?;
            }
        }
        Ok(())
    }

    /// One renewal sweep: every channel expiring within the next
    /// interval is stopped and re-registered. A failure for one user
    /// does not block the others. Returns the number of channels
    /// renewed.
    pub async fn renew_due(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now + self.renewal_interval;
        let due = match self.users.channels_expiring_by(cutoff).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "could not list channels due for renewal");
                return 0;
            }
        };

        let mut renewed = 0;
        for user in due {
            match self.renew_one(user.id).await {
                Ok(()) => renewed += 1,
                Err(err) => {
                    warn!(user = %user.id, error = %err, "channel renewal failed")
                }
            }
        }
        renewed
    }

    async fn renew_one(&self, user_id: Uuid) -> SyncResult<()> {
        self.stop_channel(user_id).await?;
        self.ensure_channel(user_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::reconcile::{Reconciler, SyncReport};
    use crate::test_support::{test_user, FakeRefresher, FakeRemote, FakeUserStore};
    use crate::user::User;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct CountingReconciler {
        runs: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Reconciler for CountingReconciler {
        async fn reconcile(&self, _user_id: Uuid) -> SyncResult<SyncReport> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(SyncReport::default())
        }
    }

    struct Fixture {
        manager: ChannelManager,
        users: Arc<FakeUserStore>,
        remote: Arc<FakeRemote>,
        dispatcher: Arc<SyncDispatcher>,
        runs: Arc<CountingReconciler>,
    }

    fn fixture(users: Vec<User>) -> Fixture {
        let users = Arc::new(FakeUserStore::with_users(users));
        let remote = Arc::new(FakeRemote::with_events(vec![]));
        let refresher = Arc::new(FakeRefresher::returning("fresh"));
        let guard = Arc::new(CredentialGuard::new(users.clone(), refresher));
        let runs = Arc::new(CountingReconciler {
            runs: AtomicUsize::new(0),
        });
        let dispatcher = SyncDispatcher::new(runs.clone(), 4);
        let manager = ChannelManager::new(
            users.clone(),
            remote.clone(),
            guard,
            dispatcher.clone(),
            "https://example.com/api/webhook/calendar".to_string(),
            Duration::hours(1),
        );
        Fixture {
            manager,
            users,
            remote,
            dispatcher,
            runs,
        }
    }

    fn channel(id: &str, expiration: DateTime<Utc>) -> WebhookChannel {
        WebhookChannel {
            channel_id: id.to_string(),
            resource_id: format!("{id}-res"),
            expiration,
        }
    }

    async fn wait_for_runs(fx: &Fixture, expected: usize) {
        for _ in 0..200 {
            if fx.runs.runs.load(Ordering::SeqCst) == expected && fx.dispatcher.is_idle() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!(
            "expected {expected} sync runs, saw {}",
            fx.runs.runs.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn registers_a_channel_when_none_exists() {
        let user = test_user();
        let user_id = user.id;
        let fx = fixture(vec![user]);

        let channel = fx.manager.ensure_channel(user_id).await.unwrap();

        assert!(channel
            .channel_id
            .starts_with(&format!("channel-{user_id}-")));
        let stored = fx.users.get_sync(user_id).unwrap().channel.unwrap();
        assert_eq!(stored, channel);
        assert_eq!(fx.remote.registered_watches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keeps_an_active_channel_untouched() {
        let mut user = test_user();
        let user_id = user.id;
        let existing = channel("ch-live", Utc::now() + Duration::hours(12));
        user.channel = Some(existing.clone());
        let fx = fixture(vec![user]);

        let returned = fx.manager.ensure_channel(user_id).await.unwrap();

        assert_eq!(returned, existing);
        assert!(fx.remote.registered_watches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaces_an_expired_channel() {
        let mut user = test_user();
        let user_id = user.id;
        user.channel = Some(channel("ch-old", Utc::now() - Duration::minutes(5)));
        let fx = fixture(vec![user]);

        let renewed = fx.manager.ensure_channel(user_id).await.unwrap();

        assert_ne!(renewed.channel_id, "ch-old");
        assert_eq!(fx.remote.registered_watches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_remotely_and_clears_the_record() {
        let mut user = test_user();
        let user_id = user.id;
        user.channel = Some(channel("ch-live", Utc::now() + Duration::hours(12)));
        let fx = fixture(vec![user]);

        fx.manager.stop_channel(user_id).await.unwrap();

        assert!(fx.users.get_sync(user_id).unwrap().channel.is_none());
        assert_eq!(
            fx.remote.cancelled_watches.lock().unwrap().clone(),
            vec![("ch-live".to_string(), "ch-live-res".to_string())]
        );
    }

    #[tokio::test]
    async fn stop_clears_the_record_even_when_remote_cancel_fails() {
        let mut user = test_user();
        let user_id = user.id;
        user.channel = Some(channel("ch-live", Utc::now() + Duration::hours(12)));
        let fx = fixture(vec![user]);
        fx.remote
            .fail_next_cancel(RemoteError::Unavailable("503".to_string()));

        fx.manager.stop_channel(user_id).await.unwrap();

        assert!(fx.users.get_sync(user_id).unwrap().channel.is_none());
    }

    #[tokio::test]
    async fn update_notification_triggers_a_sync_for_the_owner() {
        let mut user = test_user();
        user.channel = Some(channel("ch-live", Utc::now() + Duration::hours(12)));
        let fx = fixture(vec![user]);

        fx.manager
            .handle_notification("ch-live", ResourceState::Update)
            .await
            .unwrap();

        wait_for_runs(&fx, 1).await;
    }

    #[tokio::test]
    async fn unknown_channel_notification_is_discarded() {
        let fx = fixture(vec![test_user()]);

        fx.manager
            .handle_notification("ch-unknown", ResourceState::Update)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(fx.runs.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_exists_clears_the_channel_without_renewing() {
        let mut user = test_user();
        let user_id = user.id;
        user.channel = Some(channel("ch-live", Utc::now() + Duration::hours(12)));
        let fx = fixture(vec![user]);

        fx.manager
            .handle_notification("ch-live", ResourceState::NotExists)
            .await
            .unwrap();

        assert!(fx.users.get_sync(user_id).unwrap().channel.is_none());
        assert!(fx.remote.registered_watches.lock().unwrap().is_empty());
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(fx.runs.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sweep_renews_channels_expiring_within_the_interval_only() {
        let now = Utc::now();
        let mut due_user = test_user();
        let due_id = due_user.id;
        due_user.channel = Some(channel("ch-due", now + Duration::minutes(30)));

        let mut fresh_user = test_user();
        let fresh_id = fresh_user.id;
        fresh_user.channel = Some(channel("ch-fresh", now + Duration::hours(12)));

        let fx = fixture(vec![due_user, fresh_user]);

        let renewed = fx.manager.renew_due(now).await;

        assert_eq!(renewed, 1);
        let due_channel = fx.users.get_sync(due_id).unwrap().channel.unwrap();
        assert_ne!(due_channel.channel_id, "ch-due");
        let fresh_channel = fx.users.get_sync(fresh_id).unwrap().channel.unwrap();
        assert_eq!(fresh_channel.channel_id, "ch-fresh");
    }

    #[tokio::test]
    async fn one_failed_renewal_does_not_block_the_others() {
        let now = Utc::now();
        let mut broken_user = test_user();
        // No usable credential: renewal for this user must fail.
        broken_user.access_token = String::new();
        broken_user.refresh_token = None;
        broken_user.channel = Some(channel("ch-broken", now + Duration::minutes(10)));

        let mut due_user = test_user();
        let due_id = due_user.id;
        due_user.channel = Some(channel("ch-due", now + Duration::minutes(30)));

        let fx = fixture(vec![broken_user, due_user]);

        let renewed = fx.manager.renew_due(now).await;

        assert_eq!(renewed, 1);
        let due_channel = fx.users.get_sync(due_id).unwrap().channel.unwrap();
        assert_ne!(due_channel.channel_id, "ch-due");
    }

    #[test]
    fn resource_state_parses_the_wire_values() {
        assert_eq!(ResourceState::parse("sync"), Some(ResourceState::Sync));
        assert_eq!(ResourceState::parse("exists"), Some(ResourceState::Exists));
        assert_eq!(ResourceState::parse("update"), Some(ResourceState::Update));
        assert_eq!(
            ResourceState::parse("not_exists"),
            Some(ResourceState::NotExists)
        );
        assert_eq!(ResourceState::parse("anything-else"), None);
    }

    #[tokio::test]
    async fn stop_without_a_channel_is_a_no_op() {
        let user = test_user();
        let user_id = user.id;
        let fx = fixture(vec![user]);

        fx.manager.stop_channel(user_id).await.unwrap();

        assert!(fx.remote.cancelled_watches.lock().unwrap().is_empty());
        // clear_channel was not called either
        assert!(!fx
            .users
            .calls()
            .iter()
            .any(|c| matches!(c, crate::test_support::StoreCall::ClearChannel(_))));
    }
}

//! In-memory fakes of the port traits, shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{RemoteError, StoreError};
use crate::event::{EventDraft, EventPatch, EventTime, MirrorEvent, RemoteEvent};
use crate::remote::{RefreshedTokens, RemoteCalendar, TokenRefresher, WatchRegistration};
use crate::store::{MirrorStore, UserStore};
use crate::user::{User, WebhookChannel};

/// Build a user with no channel and a refresh token, for tests that
/// only need a valid credential record.
pub fn test_user() -> User {
    User {
        id: Uuid::new_v4(),
        google_id: "google-1".to_string(),
        email: "user@example.com".to_string(),
        access_token: "access".to_string(),
        refresh_token: Some("refresh".to_string()),
        channel: None,
    }
}

pub fn timed_event(id: &str, title: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> RemoteEvent {
    RemoteEvent {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        start: EventTime::DateTime(start),
        end: EventTime::DateTime(end),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    SaveTokens(Uuid, String),
    SaveChannel(Uuid, String),
    ClearChannel(Uuid),
}

#[derive(Default)]
pub struct FakeUserStore {
    users: Mutex<HashMap<Uuid, User>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl FakeUserStore {
    pub fn with_user(user: User) -> Self {
        let store = FakeUserStore::default();
        store.users.lock().unwrap().insert(user.id, user);
        store
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = FakeUserStore::default();
        {
            let mut map = store.users.lock().unwrap();
            for user in users {
                map.insert(user.id, user);
            }
        }
        store
    }

    pub fn get_sync(&self, user_id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&user_id).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserStore for FakeUserStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.lock().unwrap().values().cloned().collect())
    }

    async fn upsert_by_google_id(
        &self,
        google_id: &str,
        email: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(existing) = users.values_mut().find(|u| u.google_id == google_id) {
            existing.access_token = access_token.to_string();
            if let Some(refresh) = refresh_token {
                existing.refresh_token = Some(refresh.to_string());
            }
            return Ok(existing.clone());
        }
        let user = User {
            id: Uuid::new_v4(),
            google_id: google_id.to_string(),
            email: email.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            channel: None,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save_tokens(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.access_token = access_token.to_string();
        user.refresh_token = refresh_token.map(str::to_string);
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::SaveTokens(user_id, access_token.to_string()));
        Ok(())
    }

    async fn save_channel(
        &self,
        user_id: Uuid,
        channel: &WebhookChannel,
    ) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.channel = Some(channel.clone());
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::SaveChannel(user_id, channel.channel_id.clone()));
        Ok(())
    }

    async fn clear_channel(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.channel = None;
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::ClearChannel(user_id));
        Ok(())
    }

    async fn find_by_channel(&self, channel_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| {
                u.channel
                    .as_ref()
                    .is_some_and(|ch| ch.channel_id == channel_id)
            })
            .cloned())
    }

    async fn channels_expiring_by(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| {
                u.channel
                    .as_ref()
                    .is_some_and(|ch| ch.expiration <= cutoff)
            })
            .cloned()
            .collect())
    }
}

pub struct FakeRefresher {
    access_token: String,
    rotated_refresh: Option<String>,
    error: Option<RemoteError>,
    calls: AtomicUsize,
}

impl FakeRefresher {
    pub fn returning(access_token: &str) -> Self {
        FakeRefresher {
            access_token: access_token.to_string(),
            rotated_refresh: None,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning_rotated(access_token: &str, refresh_token: &str) -> Self {
        FakeRefresher {
            rotated_refresh: Some(refresh_token.to_string()),
            ..Self::returning(access_token)
        }
    }

    pub fn failing(error: RemoteError) -> Self {
        FakeRefresher {
            error: Some(error),
            ..Self::returning("")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedTokens, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        Ok(RefreshedTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.rotated_refresh.clone(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}

/// Scripted remote calendar. Events are served from an in-memory list;
/// each operation can be primed to fail with a queue of errors that is
/// drained one call at a time.
pub struct FakeRemote {
    pub events: Mutex<Vec<RemoteEvent>>,
    list_errors: Mutex<VecDeque<RemoteError>>,
    create_errors: Mutex<VecDeque<RemoteError>>,
    cancel_errors: Mutex<VecDeque<RemoteError>>,
    pub watch_ttl: Mutex<Duration>,
    pub created: Mutex<Vec<EventDraft>>,
    pub updated: Mutex<Vec<(String, EventPatch)>>,
    pub deleted: Mutex<Vec<String>>,
    pub registered_watches: Mutex<Vec<String>>,
    pub cancelled_watches: Mutex<Vec<(String, String)>>,
    pub tokens_seen: Mutex<Vec<String>>,
    next_id: AtomicI64,
    next_resource: AtomicI64,
}

impl Default for FakeRemote {
    fn default() -> Self {
        FakeRemote {
            events: Mutex::new(Vec::new()),
            list_errors: Mutex::new(VecDeque::new()),
            create_errors: Mutex::new(VecDeque::new()),
            cancel_errors: Mutex::new(VecDeque::new()),
            watch_ttl: Mutex::new(Duration::hours(24)),
            created: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            registered_watches: Mutex::new(Vec::new()),
            cancelled_watches: Mutex::new(Vec::new()),
            tokens_seen: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            next_resource: AtomicI64::new(1),
        }
    }
}

impl FakeRemote {
    pub fn with_events(events: Vec<RemoteEvent>) -> Self {
        let remote = FakeRemote::default();
        *remote.events.lock().unwrap() = events;
        remote
    }

    pub fn fail_next_list(&self, error: RemoteError) {
        self.list_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_create(&self, error: RemoteError) {
        self.create_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_cancel(&self, error: RemoteError) {
        self.cancel_errors.lock().unwrap().push_back(error);
    }

    fn take_error(queue: &Mutex<VecDeque<RemoteError>>) -> Option<RemoteError> {
        queue.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl RemoteCalendar for FakeRemote {
    async fn list_events(&self, access_token: &str) -> Result<Vec<RemoteEvent>, RemoteError> {
        self.tokens_seen
            .lock()
            .unwrap()
            .push(access_token.to_string());
        if let Some(err) = Self::take_error(&self.list_errors) {
            return Err(err);
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn create_event(
        &self,
        _access_token: &str,
        draft: &EventDraft,
    ) -> Result<RemoteEvent, RemoteError> {
        if let Some(err) = Self::take_error(&self.create_errors) {
            return Err(err);
        }
        let id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let event = RemoteEvent {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            start: EventTime::DateTime(draft.start),
            end: EventTime::DateTime(draft.end),
        };
        self.created.lock().unwrap().push(draft.clone());
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn update_event(
        &self,
        _access_token: &str,
        external_id: &str,
        patch: &EventPatch,
    ) -> Result<RemoteEvent, RemoteError> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == external_id)
            .ok_or(RemoteError::NotFound)?;
        if let Some(title) = &patch.title {
            event.title = title.clone();
        }
        if let Some(description) = &patch.description {
            event.description = Some(description.clone());
        }
        if let Some(start) = patch.start {
            event.start = EventTime::DateTime(start);
        }
        if let Some(end) = patch.end {
            event.end = EventTime::DateTime(end);
        }
        self.updated
            .lock()
            .unwrap()
            .push((external_id.to_string(), patch.clone()));
        Ok(event.clone())
    }

    async fn delete_event(
        &self,
        _access_token: &str,
        external_id: &str,
    ) -> Result<(), RemoteError> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|e| e.id != external_id);
        if events.len() == before {
            return Err(RemoteError::NotFound);
        }
        self.deleted.lock().unwrap().push(external_id.to_string());
        Ok(())
    }

    async fn register_watch(
        &self,
        _access_token: &str,
        channel_id: &str,
        _callback_url: &str,
    ) -> Result<WatchRegistration, RemoteError> {
        self.registered_watches
            .lock()
            .unwrap()
            .push(channel_id.to_string());
        Ok(WatchRegistration {
            channel_id: channel_id.to_string(),
            resource_id: format!("res-{}", self.next_resource.fetch_add(1, Ordering::SeqCst)),
            expiration: Utc::now() + *self.watch_ttl.lock().unwrap(),
        })
    }

    async fn cancel_watch(
        &self,
        _access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), RemoteError> {
        if let Some(err) = Self::take_error(&self.cancel_errors) {
            return Err(err);
        }
        self.cancelled_watches
            .lock()
            .unwrap()
            .push((channel_id.to_string(), resource_id.to_string()));
        Ok(())
    }
}

/// In-memory mirror store. Individual rows can be primed to fail their
/// next write, for partial-failure tests.
#[derive(Default)]
pub struct FakeMirror {
    rows: Mutex<HashMap<i64, MirrorEvent>>,
    next_id: AtomicI64,
    pub fail_upsert_for: Mutex<HashSet<String>>,
    pub fail_delete_for: Mutex<HashSet<String>>,
}

impl FakeMirror {
    pub fn seed(&self, events: Vec<MirrorEvent>) {
        let mut rows = self.rows.lock().unwrap();
        for mut event in events {
            if event.id == 0 {
                event.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            }
            rows.insert(event.id, event);
        }
    }

    pub fn rows_for(&self, user_id: Uuid) -> Vec<MirrorEvent> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.start.cmp(&b.start));
        rows
    }
}

#[async_trait]
impl MirrorStore for FakeMirror {
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<MirrorEvent>, StoreError> {
        Ok(self.rows_for(user_id))
    }

    async fn find(
        &self,
        user_id: Uuid,
        external_event_id: &str,
    ) -> Result<Option<MirrorEvent>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|e| e.user_id == user_id && e.external_event_id == external_event_id)
            .cloned())
    }

    async fn upsert(&self, event: &MirrorEvent) -> Result<MirrorEvent, StoreError> {
        if self
            .fail_upsert_for
            .lock()
            .unwrap()
            .contains(&event.external_event_id)
        {
            return Err(StoreError::Query("primed upsert failure".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        let existing_id = rows
            .values()
            .find(|e| {
                e.user_id == event.user_id && e.external_event_id == event.external_event_id
            })
            .map(|e| e.id);
        let mut stored = event.clone();
        stored.id =
            existing_id.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        rows.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(event) = rows.get(&id) {
            if self
                .fail_delete_for
                .lock()
                .unwrap()
                .contains(&event.external_event_id)
            {
                return Err(StoreError::Query("primed delete failure".to_string()));
            }
        }
        rows.remove(&id);
        Ok(())
    }
}

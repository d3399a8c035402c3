//! Provider-neutral event types.
//!
//! Remote events are transient: they are fetched per sync run and
//! always pass through [`RemoteEvent::normalized`] before they are
//! compared against the mirror or written to it.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// When an event starts or ends. The remote service returns either a
/// precise instant or an all-day date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl EventTime {
    /// Normalize to a UTC instant. All-day dates map to start of day
    /// in UTC, the fixed reference zone for the mirror.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }
}

/// An event as represented by the external calendar service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
}

impl RemoteEvent {
    /// Collapse the start/end variants into plain UTC instants.
    pub fn normalized(&self) -> NormalizedEvent {
        NormalizedEvent {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            start: self.start.to_utc(),
            end: self.end.to_utc(),
        }
    }
}

/// A remote event after time normalization, ready for diffing.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.title,
            self.description.as_deref(),
            self.start,
            self.end,
        )
    }
}

/// The locally persisted copy of a remote event, identified by the
/// remote's event id within the owning user's event set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorEvent {
    /// Store-assigned row id; 0 until persisted.
    pub id: i64,
    pub user_id: Uuid,
    pub external_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Fingerprint of the remote state this row was last synced to.
    pub fingerprint: String,
}

impl MirrorEvent {
    pub fn from_remote(user_id: Uuid, remote: &NormalizedEvent) -> Self {
        MirrorEvent {
            id: 0,
            user_id,
            external_event_id: remote.id.clone(),
            title: remote.title.clone(),
            description: remote.description.clone(),
            start: remote.start,
            end: remote.end,
            fingerprint: remote.fingerprint(),
        }
    }

    /// Overwrite the mutable fields from the remote event, keeping the
    /// row identity.
    pub fn apply_remote(&mut self, remote: &NormalizedEvent) {
        self.title = remote.title.clone();
        self.description = remote.description.clone();
        self.start = remote.start;
        self.end = remote.end;
        self.fingerprint = remote.fingerprint();
    }
}

/// A user-initiated event creation, pushed to the remote service first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A user-initiated partial update. Fields left as `None` keep their
/// current remote value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Derived comparison key over (title, description, start, end), used
/// to detect whether a mirror event is stale relative to its remote
/// counterpart.
pub fn fingerprint(
    title: &str,
    description: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0]);
    hasher.update(description.unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(start.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(end.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

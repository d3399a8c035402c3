//! Conversion between the Google Calendar wire shape and the
//! provider-neutral event types.

use calmirror_core::event::{EventDraft, EventPatch, EventTime, RemoteEvent};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// An event as sent and received by the Calendar v3 API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoogleEvent {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start: GoogleEventTime,
    pub end: GoogleEventTime,
}

/// Either a precise instant (`dateTime`) or an all-day date (`date`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoogleEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl GoogleEventTime {
    fn instant(dt: DateTime<Utc>) -> Self {
        GoogleEventTime {
            date_time: Some(dt),
            date: None,
            time_zone: Some("UTC".to_string()),
        }
    }

    fn to_event_time(&self) -> Option<EventTime> {
        match (self.date_time, self.date) {
            (Some(dt), _) => Some(EventTime::DateTime(dt)),
            (None, Some(date)) => Some(EventTime::Date(date)),
            (None, None) => None,
        }
    }
}

/// Map a listed Google event to the neutral shape. Returns `None` for
/// cancelled events (Google's deletion marker) and for entries missing
/// an id or usable times, which the mirror treats as absent.
pub fn from_google(event: GoogleEvent) -> Option<RemoteEvent> {
    if event.id.is_empty() || event.status.as_deref() == Some("cancelled") {
        return None;
    }
    let start = event.start.to_event_time()?;
    let end = event.end.to_event_time()?;
    Some(RemoteEvent {
        id: event.id,
        title: event.summary.unwrap_or_default(),
        description: event.description,
        start,
        end,
    })
}

pub fn to_google(draft: &EventDraft) -> GoogleEvent {
    GoogleEvent {
        id: String::new(),
        summary: Some(draft.title.clone()),
        description: draft.description.clone(),
        status: None,
        start: GoogleEventTime::instant(draft.start),
        end: GoogleEventTime::instant(draft.end),
    }
}

/// Merge a patch into the current remote payload, keeping unspecified
/// fields at their remote values.
pub fn merge_patch(mut existing: GoogleEvent, patch: &EventPatch) -> GoogleEvent {
    if let Some(title) = &patch.title {
        existing.summary = Some(title.clone());
    }
    if let Some(description) = &patch.description {
        existing.description = Some(description.clone());
    }
    if let Some(start) = patch.start {
        existing.start = GoogleEventTime::instant(start);
    }
    if let Some(end) = patch.end {
        existing.end = GoogleEventTime::instant(end);
    }
    existing
}

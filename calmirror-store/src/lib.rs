//! SQLite-backed persistence for calmirror.
//!
//! One [`Database`] implements both the `UserStore` and `MirrorStore`
//! ports. The connection sits behind a `std::sync::Mutex` rather than
//! an async lock: every query is short and no lock is ever held across
//! an await point.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use calmirror_core::error::StoreError;
use calmirror_core::event::MirrorEvent;
use calmirror_core::store::{MirrorStore, UserStore};
use calmirror_core::user::{User, WebhookChannel};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;
use uuid::Uuid;

pub struct Database {
    conn: Mutex<Connection>,
}

fn query_err(err: rusqlite::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_db_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("bad timestamp '{value}': {e}")))
}

fn from_db_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Query(format!("bad uuid '{value}': {e}")))
}

impl Database {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(query_err)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(query_err)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id                 TEXT PRIMARY KEY,
                    google_id          TEXT NOT NULL UNIQUE,
                    email              TEXT NOT NULL,
                    access_token       TEXT NOT NULL,
                    refresh_token      TEXT,
                    channel_id         TEXT,
                    resource_id        TEXT,
                    channel_expiration TEXT
                );
                CREATE TABLE IF NOT EXISTS events (
                    id                INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id           TEXT NOT NULL REFERENCES users(id),
                    external_event_id TEXT NOT NULL,
                    title             TEXT NOT NULL,
                    description       TEXT,
                    start_at          TEXT NOT NULL,
                    end_at            TEXT NOT NULL,
                    fingerprint       TEXT NOT NULL,
                    UNIQUE (user_id, external_event_id)
                );
                CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id);",
            )
            .map_err(query_err)
    }

    fn row_to_user(row: &Row<'_>) -> rusqlite::Result<RawUser> {
        Ok(RawUser {
            id: row.get(0)?,
            google_id: row.get(1)?,
            email: row.get(2)?,
            access_token: row.get(3)?,
            refresh_token: row.get(4)?,
            channel_id: row.get(5)?,
            resource_id: row.get(6)?,
            channel_expiration: row.get(7)?,
        })
    }

    fn row_to_event(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
        Ok(RawEvent {
            id: row.get(0)?,
            user_id: row.get(1)?,
            external_event_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            start_at: row.get(5)?,
            end_at: row.get(6)?,
            fingerprint: row.get(7)?,
        })
    }
}

const USER_COLUMNS: &str =
    "id, google_id, email, access_token, refresh_token, channel_id, resource_id, channel_expiration";
const EVENT_COLUMNS: &str =
    "id, user_id, external_event_id, title, description, start_at, end_at, fingerprint";

struct RawUser {
    id: String,
    google_id: String,
    email: String,
    access_token: String,
    refresh_token: Option<String>,
    channel_id: Option<String>,
    resource_id: Option<String>,
    channel_expiration: Option<String>,
}

impl RawUser {
    fn into_user(self) -> Result<User, StoreError> {
        let channel = match (self.channel_id, self.resource_id, self.channel_expiration) {
            (Some(channel_id), Some(resource_id), Some(expiration)) => Some(WebhookChannel {
                channel_id,
                resource_id,
                expiration: from_db_time(&expiration)?,
            }),
            _ => None,
        };
        Ok(User {
            id: from_db_uuid(&self.id)?,
            google_id: self.google_id,
            email: self.email,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            channel,
        })
    }
}

struct RawEvent {
    id: i64,
    user_id: String,
    external_event_id: String,
    title: String,
    description: Option<String>,
    start_at: String,
    end_at: String,
    fingerprint: String,
}

impl RawEvent {
    fn into_event(self) -> Result<MirrorEvent, StoreError> {
        Ok(MirrorEvent {
            id: self.id,
            user_id: from_db_uuid(&self.user_id)?,
            external_event_id: self.external_event_id,
            title: self.title,
            description: self.description,
            start: from_db_time(&self.start_at)?,
            end: from_db_time(&self.end_at)?,
            fingerprint: self.fingerprint,
        })
    }
}

#[async_trait]
impl UserStore for Database {
    async fn get(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
            .map_err(query_err)?;
        let mut rows = stmt
            .query_map(params![user_id.to_string()], Self::row_to_user)
            .map_err(query_err)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw.map_err(query_err)?.into_user()?)),
            None => Ok(None),
        }
    }

    async fn all(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users"))
            .map_err(query_err)?;
        let rows = stmt.query_map([], Self::row_to_user).map_err(query_err)?;
        let mut users = Vec::new();
        for raw in rows {
            users.push(raw.map_err(query_err)?.into_user()?);
        }
        Ok(users)
    }

    async fn upsert_by_google_id(
        &self,
        google_id: &str,
        email: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<User, StoreError> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE google_id = ?1",
                params![google_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(query_err(other)),
            })?;

        let id = match existing {
            Some(id) => {
                // Keep the stored refresh token when sign-in did not
                // issue a new one.
                conn.execute(
                    "UPDATE users SET email = ?2, access_token = ?3,
                        refresh_token = COALESCE(?4, refresh_token)
                     WHERE id = ?1",
                    params![id, email, access_token, refresh_token],
                )
                .map_err(query_err)?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO users (id, google_id, email, access_token, refresh_token)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, google_id, email, access_token, refresh_token],
                )
                .map_err(query_err)?;
                id
            }
        };

        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            Self::row_to_user,
        )
        .map_err(query_err)?
        .into_user()
    }

    async fn save_tokens(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE users SET access_token = ?2, refresh_token = ?3 WHERE id = ?1",
                params![user_id.to_string(), access_token, refresh_token],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn save_channel(
        &self,
        user_id: Uuid,
        channel: &WebhookChannel,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE users SET channel_id = ?2, resource_id = ?3, channel_expiration = ?4
                 WHERE id = ?1",
                params![
                    user_id.to_string(),
                    channel.channel_id,
                    channel.resource_id,
                    to_db_time(channel.expiration)
                ],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn clear_channel(&self, user_id: Uuid) -> Result<(), StoreError> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE users SET channel_id = NULL, resource_id = NULL, channel_expiration = NULL
                 WHERE id = ?1",
                params![user_id.to_string()],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn find_by_channel(&self, channel_id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE channel_id = ?1"
            ))
            .map_err(query_err)?;
        let mut rows = stmt
            .query_map(params![channel_id], Self::row_to_user)
            .map_err(query_err)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw.map_err(query_err)?.into_user()?)),
            None => Ok(None),
        }
    }

    async fn channels_expiring_by(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError> {
        // Filter on parsed timestamps rather than comparing the stored
        // text, which is not ordering-safe across formats.
        let users = self.all().await?;
        Ok(users
            .into_iter()
            .filter(|u| {
                u.channel
                    .as_ref()
                    .is_some_and(|ch| ch.expiration <= cutoff)
            })
            .collect())
    }
}

#[async_trait]
impl MirrorStore for Database {
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<MirrorEvent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 ORDER BY start_at ASC"
            ))
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![user_id.to_string()], Self::row_to_event)
            .map_err(query_err)?;
        let mut events = Vec::new();
        for raw in rows {
            events.push(raw.map_err(query_err)?.into_event()?);
        }
        Ok(events)
    }

    async fn find(
        &self,
        user_id: Uuid,
        external_event_id: &str,
    ) -> Result<Option<MirrorEvent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE user_id = ?1 AND external_event_id = ?2"
            ))
            .map_err(query_err)?;
        let mut rows = stmt
            .query_map(
                params![user_id.to_string(), external_event_id],
                Self::row_to_event,
            )
            .map_err(query_err)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw.map_err(query_err)?.into_event()?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, event: &MirrorEvent) -> Result<MirrorEvent, StoreError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO events
                    (user_id, external_event_id, title, description, start_at, end_at, fingerprint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id, external_event_id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    start_at = excluded.start_at,
                    end_at = excluded.end_at,
                    fingerprint = excluded.fingerprint",
                params![
                    event.user_id.to_string(),
                    event.external_event_id,
                    event.title,
                    event.description,
                    to_db_time(event.start),
                    to_db_time(event.end),
                    event.fingerprint
                ],
            )
            .map_err(query_err)?;
        }
        self.find(event.user_id, &event.external_event_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM events WHERE id = ?1", params![id])
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

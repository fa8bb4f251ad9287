use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serene_common::{MeditationSession, NewMeditationSession, NewProfile, Profile, ProfileUpdate};

use super::{PracticeLog, ProfileStore, StoreResult};
use crate::error::StoreError;

const PROFILE_COLUMNS: &str = "id, email, username, display_name, avatar_url, provider, updated_at";

/// SQLite-backed profile store and practice log.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(database_url: &str) -> StoreResult<Self> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Create parent directories if needed
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
            Connection::open(path)?
        };

        conn.execute(
            "CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                email TEXT,
                username TEXT NOT NULL UNIQUE CHECK (length(username) > 0),
                display_name TEXT,
                avatar_url TEXT,
                provider TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS meditation_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                completed INTEGER NOT NULL DEFAULT 1
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_meditation_sessions_user_id ON meditation_sessions(user_id)",
            [],
        )?;

        tracing::info!("Profile store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::new(":memory:")
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn fetch_where(&self, column: &str, value: &str) -> StoreResult<Option<Profile>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM profiles WHERE {} = ?1", PROFILE_COLUMNS, column);
        let profile = conn.query_row(&sql, params![value], profile_from_row).optional()?;
        Ok(profile)
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Read an RFC 3339 text column. A malformed value is a conversion error.
fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        avatar_url: row.get(4)?,
        provider: row.get(5)?,
        updated_at: timestamp_at(row, 6)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn fetch_by_id(&self, id: &str) -> StoreResult<Option<Profile>> {
        self.fetch_where("id", id)
    }

    async fn fetch_by_username(&self, username: &str) -> StoreResult<Option<Profile>> {
        self.fetch_where("username", username)
    }

    async fn insert_if_absent(&self, profile: &NewProfile) -> StoreResult<bool> {
        let conn = self.lock()?;

        let written = conn.execute(
            "INSERT INTO profiles (id, email, username, display_name, avatar_url, provider, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT DO NOTHING",
            params![
                profile.id,
                profile.email,
                profile.username,
                profile.display_name,
                profile.avatar_url,
                profile.provider,
                timestamp(&profile.updated_at),
            ],
        )?;

        if written == 1 {
            tracing::info!("Created profile {} ({})", profile.id, profile.username);
            return Ok(true);
        }

        // Nothing written: either the id exists already (the no-op case) or
        // the username belongs to someone else.
        let id_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM profiles WHERE id = ?1)",
            params![profile.id],
            |row| row.get(0),
        )?;

        if id_exists {
            Ok(false)
        } else {
            Err(StoreError::UsernameTaken(profile.username.clone()))
        }
    }

    async fn update_by_id(&self, id: &str, update: &ProfileUpdate) -> StoreResult<Profile> {
        {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE profiles SET
                        username = COALESCE(?1, username),
                        display_name = COALESCE(?2, display_name),
                        avatar_url = COALESCE(?3, avatar_url),
                        updated_at = ?4
                     WHERE id = ?5",
                    params![
                        update.username,
                        update.display_name,
                        update.avatar_url,
                        timestamp(&Utc::now()),
                        id,
                    ],
                )
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        StoreError::UsernameTaken(update.username.clone().unwrap_or_default())
                    } else {
                        StoreError::from(e)
                    }
                })?;

            if changed == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }

        self.fetch_where("id", id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl PracticeLog for SqliteStore {
    async fn record(&self, session: NewMeditationSession) -> StoreResult<MeditationSession> {
        let session = session.into_session();
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO meditation_sessions (id, user_id, completed_at, duration_minutes, completed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.user_id,
                timestamp(&session.completed_at),
                session.duration_minutes,
                session.completed,
            ],
        )?;

        tracing::debug!("Recorded meditation session {} for {}", session.id, session.user_id);
        Ok(session)
    }

    async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<MeditationSession>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, completed_at, duration_minutes, completed
             FROM meditation_sessions WHERE user_id = ?1
             ORDER BY completed_at DESC",
        )?;

        let sessions = stmt
            .query_map(params![user_id], |row| {
                Ok(MeditationSession {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    completed_at: timestamp_at(row, 2)?,
                    duration_minutes: row.get(3)?,
                    completed: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_profile(id: &str, username: &str) -> NewProfile {
        NewProfile {
            id: id.to_string(),
            email: Some(format!("{}@example.com", username)),
            username: username.to_string(),
            display_name: None,
            avatar_url: None,
            provider: "email".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.insert_if_absent(&new_profile("u1", "calm")).await.unwrap());

        let by_id = store.fetch_by_id("u1").await.unwrap().unwrap();
        assert_eq!(by_id.username, "calm");
        let by_name = store.fetch_by_username("calm").await.unwrap().unwrap();
        assert_eq!(by_name.id, "u1");
        assert!(store.fetch_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_same_id_is_noop() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.insert_if_absent(&new_profile("u1", "calm")).await.unwrap());
        assert!(!store.insert_if_absent(&new_profile("u1", "other")).await.unwrap());

        let profile = store.fetch_by_id("u1").await.unwrap().unwrap();
        assert_eq!(profile.username, "calm");
        assert!(store.fetch_by_username("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_username_owned_by_other_id() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_if_absent(&new_profile("u1", "calm")).await.unwrap();

        let err = store.insert_if_absent(&new_profile("u2", "calm")).await.unwrap_err();
        assert_eq!(err, StoreError::UsernameTaken("calm".to_string()));
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.insert_if_absent(&new_profile("u1", "")).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[tokio::test]
    async fn test_update_by_id() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_if_absent(&new_profile("u1", "calm")).await.unwrap();
        store.insert_if_absent(&new_profile("u2", "still")).await.unwrap();

        let update = ProfileUpdate {
            display_name: Some("Calm One".to_string()),
            ..Default::default()
        };
        let updated = store.update_by_id("u1", &update).await.unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Calm One"));
        assert_eq!(updated.username, "calm");

        let clash = ProfileUpdate {
            username: Some("still".to_string()),
            ..Default::default()
        };
        assert_eq!(
            store.update_by_id("u1", &clash).await.unwrap_err(),
            StoreError::UsernameTaken("still".to_string())
        );
        assert_eq!(
            store.update_by_id("nobody", &update).await.unwrap_err(),
            StoreError::NotFound("nobody".to_string())
        );
    }

    #[tokio::test]
    async fn test_practice_log_orders_most_recent_first() {
        let store = SqliteStore::in_memory().unwrap();
        for (day, minutes) in [(1, 10), (3, 20), (2, 15)] {
            store
                .record(NewMeditationSession {
                    user_id: "u1".to_string(),
                    completed_at: Utc.with_ymd_and_hms(2026, 10, day, 7, 0, 0).unwrap(),
                    duration_minutes: minutes,
                    completed: true,
                })
                .await
                .unwrap();
        }
        store
            .record(NewMeditationSession {
                user_id: "u2".to_string(),
                completed_at: Utc::now(),
                duration_minutes: 5,
                completed: false,
            })
            .await
            .unwrap();

        let sessions = store.list_for_user("u1").await.unwrap();
        let minutes: Vec<u32> = sessions.iter().map(|s| s.duration_minutes).collect();
        assert_eq!(minutes, vec![20, 15, 10]);
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_an_error() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO meditation_sessions (id, user_id, completed_at, duration_minutes, completed)
                 VALUES ('s-bad', 'u1', 'last tuesday', 10, 1)",
                [],
            )
            .unwrap();

        let err = store.list_for_user("u1").await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("serene.db");
        let url = format!("sqlite:{}", path.display());
        SqliteStore::new(&url).unwrap();
        assert!(path.exists());
    }
}

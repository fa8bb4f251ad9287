//! Profile and practice storage.
//!
//! Both traits are plain keyed record stores; the hosted tables (`RestStore`)
//! and a local SQLite file (`SqliteStore`) implement them.

mod rest;
mod sqlite;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serene_common::{MeditationSession, NewMeditationSession, NewProfile, Profile, ProfileUpdate};

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch_by_id(&self, id: &str) -> StoreResult<Option<Profile>>;

    async fn fetch_by_username(&self, username: &str) -> StoreResult<Option<Profile>>;

    /// Insert `profile` unless a row with the same id exists ("on id
    /// conflict, no-op"). Returns whether a row was written.
    ///
    /// A username already owned by a different id is `UsernameTaken`.
    async fn insert_if_absent(&self, profile: &NewProfile) -> StoreResult<bool>;

    async fn update_by_id(&self, id: &str, update: &ProfileUpdate) -> StoreResult<Profile>;
}

#[async_trait]
pub trait PracticeLog: Send + Sync {
    async fn record(&self, session: NewMeditationSession) -> StoreResult<MeditationSession>;

    /// Sessions of one user, most recent first.
    async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<MeditationSession>>;
}

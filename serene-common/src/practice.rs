//! Meditation session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A completed (or abandoned) meditation sitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeditationSession {
    pub id: String,
    pub user_id: String,
    pub completed_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub completed: bool,
}

/// A sitting to be recorded; the id is assigned on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeditationSession {
    pub user_id: String,
    pub completed_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default = "default_completed")]
    pub completed: bool,
}

fn default_completed() -> bool {
    true
}

impl NewMeditationSession {
    pub fn into_session(self) -> MeditationSession {
        MeditationSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: self.user_id,
            completed_at: self.completed_at,
            duration_minutes: self.duration_minutes,
            completed: self.completed,
        }
    }
}

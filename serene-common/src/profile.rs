//! Profile records keyed 1:1 by identity id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The application's local record describing a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Identity id from the auth service.
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Unique, never empty.
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub provider: String,
    pub updated_at: DateTime<Utc>,
}

/// Row written on first sight of an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: String,
    pub email: Option<String>,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: String,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by id. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.display_name.is_none() && self.avatar_url.is_none()
    }
}

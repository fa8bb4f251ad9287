use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serene_common::{Identity, Profile};

use crate::error::AuthError;

/// Who is signed in, their profile, and what went wrong last.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<AuthError>,
}

impl SessionState {
    /// State at startup, before the stored session has been checked.
    pub fn initial() -> Self {
        Self {
            loading: true,
            ..Self::signed_out()
        }
    }

    pub fn signed_out() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: false,
            last_error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Authenticated but without a usable profile: a user-visible error state.
    pub fn is_degraded(&self) -> bool {
        !self.loading && self.identity.is_some() && self.profile.is_none()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}

fn serialize_error<S: Serializer>(error: &Option<AuthError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        None => serializer.serialize_none(),
        Some(error) => {
            let mut s = serializer.serialize_struct("AuthError", 2)?;
            s.serialize_field("type", error.code())?;
            s.serialize_field("message", &error.to_string())?;
            s.end()
        }
    }
}

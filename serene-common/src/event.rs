//! Change notifications emitted by the auth service.

use serde::{Deserialize, Serialize};

use crate::AuthSession;

/// Kind of auth state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl std::fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthEvent::InitialSession => write!(f, "INITIAL_SESSION"),
            AuthEvent::SignedIn => write!(f, "SIGNED_IN"),
            AuthEvent::SignedOut => write!(f, "SIGNED_OUT"),
            AuthEvent::TokenRefreshed => write!(f, "TOKEN_REFRESHED"),
            AuthEvent::UserUpdated => write!(f, "USER_UPDATED"),
            AuthEvent::PasswordRecovery => write!(f, "PASSWORD_RECOVERY"),
        }
    }
}

/// One notification on the auth change stream: the event and the session
/// in effect after it (`None` once signed out).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChange {
    pub event: AuthEvent,
    #[serde(default)]
    pub session: Option<AuthSession>,
}

impl AuthChange {
    pub fn new(event: AuthEvent, session: Option<AuthSession>) -> Self {
        Self { event, session }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names_match_display() {
        for event in [
            AuthEvent::InitialSession,
            AuthEvent::SignedIn,
            AuthEvent::SignedOut,
            AuthEvent::TokenRefreshed,
            AuthEvent::UserUpdated,
            AuthEvent::PasswordRecovery,
        ] {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event));
        }
    }
}

//! Error types for the session core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by Session Store operations.
///
/// Payloads are plain strings so the last error can be cloned into the
/// published session state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Username is already taken: {0}")]
    UsernameTaken(String),

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("No account found for username: {0}")]
    UsernameNotFound(String),

    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Email address has not been confirmed")]
    EmailUnconfirmed,

    #[error("Profile could not be loaded: {0}")]
    ProfileLoad(String),

    #[error("OAuth sign-in failed: {0}")]
    OAuthRedirect(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Network error: {0}")]
    Network(String),
}

impl AuthError {
    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UsernameTaken(_) => "username_taken",
            AuthError::EmailTaken => "email_taken",
            AuthError::UsernameNotFound(_) => "username_not_found",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailUnconfirmed => "email_unconfirmed",
            AuthError::ProfileLoad(_) => "profile_load",
            AuthError::OAuthRedirect(_) => "oauth_redirect",
            AuthError::Validation(_) => "validation",
            AuthError::NotSignedIn => "not_signed_in",
            AuthError::Network(_) => "network",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthError::UsernameTaken(_) | AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::UsernameNotFound(_) | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::EmailUnconfirmed => StatusCode::FORBIDDEN,
            AuthError::NotSignedIn => StatusCode::UNAUTHORIZED,
            AuthError::Validation(_) | AuthError::OAuthRedirect(_) => StatusCode::BAD_REQUEST,
            AuthError::ProfileLoad(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Network(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Classify an error reported by the auth service.
    ///
    /// The structured `error_code` is authoritative when present; older
    /// service versions only send a message, which is matched as a fallback.
    pub fn from_service(error_code: Option<&str>, message: &str) -> Self {
        if let Some(code) = error_code {
            match code {
                "user_already_exists" | "email_exists" => return AuthError::EmailTaken,
                "invalid_credentials" | "invalid_grant" => return AuthError::InvalidCredentials,
                "email_not_confirmed" => return AuthError::EmailUnconfirmed,
                "weak_password" => return AuthError::Validation(message.to_string()),
                _ => {}
            }
        }

        let lowered = message.to_lowercase();
        if lowered.contains("already registered") || lowered.contains("already exists") {
            AuthError::EmailTaken
        } else if lowered.contains("invalid login credentials") {
            AuthError::InvalidCredentials
        } else if lowered.contains("email not confirmed") {
            AuthError::EmailUnconfirmed
        } else {
            AuthError::Network(message.to_string())
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Network(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "type": self.code(),
                "message": self.to_string()
            }
        }));

        (self.status(), body).into_response()
    }
}

/// Errors from profile and practice storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Profile not found: {0}")]
    NotFound(String),
    #[error("Username is already taken: {0}")]
    UsernameTaken(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Request(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_code_wins_over_message() {
        let err = AuthError::from_service(Some("email_not_confirmed"), "Invalid login credentials");
        assert_eq!(err, AuthError::EmailUnconfirmed);
    }

    #[test]
    fn test_structured_codes() {
        assert_eq!(AuthError::from_service(Some("user_already_exists"), ""), AuthError::EmailTaken);
        assert_eq!(AuthError::from_service(Some("email_exists"), ""), AuthError::EmailTaken);
        assert_eq!(
            AuthError::from_service(Some("invalid_credentials"), "whatever"),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            AuthError::from_service(Some("weak_password"), "Password should be at least 6 characters"),
            AuthError::Validation("Password should be at least 6 characters".to_string())
        );
    }

    #[test]
    fn test_message_fallback() {
        assert_eq!(
            AuthError::from_service(None, "User already registered"),
            AuthError::EmailTaken
        );
        assert_eq!(
            AuthError::from_service(None, "Invalid login credentials"),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            AuthError::from_service(Some("unknown_code"), "Email not confirmed"),
            AuthError::EmailUnconfirmed
        );
    }

    #[test]
    fn test_unrecognised_message_keeps_original_text() {
        let err = AuthError::from_service(None, "Service temporarily unavailable");
        assert_eq!(err, AuthError::Network("Service temporarily unavailable".to_string()));
        assert_eq!(err.code(), "network");
    }

    #[test]
    fn test_into_response_status() {
        assert_eq!(AuthError::EmailTaken.into_response().status(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::UsernameNotFound("x".to_string()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Network("down".to_string()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}

//! Identity and session types mirrored from the hosted auth service.

use serde::{Deserialize, Serialize};

/// Provider name used for email/password accounts.
pub const EMAIL_PROVIDER: &str = "email";

/// Provider-supplied metadata attached to an identity.
///
/// Every field is optional: email sign-ups usually carry only the username
/// chosen at registration, OAuth providers fill in names and pictures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl IdentityMetadata {
    /// Display name reported by the provider, preferring `full_name`.
    pub fn display_name(&self) -> Option<&str> {
        non_blank(self.full_name.as_deref()).or_else(|| non_blank(self.name.as_deref()))
    }

    /// Avatar URL reported by the provider, preferring `avatar_url`.
    pub fn avatar(&self) -> Option<&str> {
        non_blank(self.avatar_url.as_deref()).or_else(|| non_blank(self.picture.as_deref()))
    }

    /// Username hint reported by the provider.
    pub fn username(&self) -> Option<&str> {
        non_blank(self.username.as_deref())
    }
}

/// An authenticated principal as known to the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Provider that authenticated this identity ("email", "google", ...).
    pub provider: String,
    #[serde(default)]
    pub metadata: IdentityMetadata,
}

impl Identity {
    /// Whether the identity signed up with email and password.
    pub fn is_email_provider(&self) -> bool {
        self.provider == EMAIL_PROVIDER
    }

    /// Text before the `@` of the email address, if any.
    pub fn email_local_part(&self) -> Option<&str> {
        let email = self.email.as_deref()?;
        let local = email.split('@').next()?.trim();
        if local.is_empty() {
            None
        } else {
            Some(local)
        }
    }
}

/// Tokens issued by the auth service together with the identity they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) after which the access token is stale.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub identity: Identity,
}

impl AuthSession {
    /// Whether the access token is past its expiry at `now` (Unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

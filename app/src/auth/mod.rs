//! Auth service abstraction.
//!
//! The session core never talks to the hosted backend directly; it goes
//! through the `AuthService` trait so tests can script the service and
//! the hosted client stays swappable.

mod callback;
mod hosted;

pub use callback::OAuthCallback;
pub use hosted::HostedAuthClient;

use async_trait::async_trait;
use serene_common::{AuthChange, AuthSession, Identity};
use tokio::sync::broadcast;

use crate::error::Result;

/// Outcome of a registration call.
///
/// Projects that require email confirmation return the new identity but no
/// session; the profile is then reconciled on the first `SIGNED_IN` event.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResult {
    pub identity: Option<Identity>,
    pub session: Option<AuthSession>,
}

/// Contract of the hosted auth service.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Current session, restoring a persisted one and refreshing it if stale.
    async fn get_session(&self) -> Result<Option<AuthSession>>;

    /// Register an email/password account. `username` travels as metadata.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        redirect_to: &str,
    ) -> Result<SignUpResult>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession>;

    /// URL the user agent must navigate to for an OAuth sign-in.
    fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String>;

    /// Adopt tokens delivered to the OAuth callback.
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<i64>,
    ) -> Result<AuthSession>;

    async fn refresh_session(&self) -> Result<AuthSession>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<()>;

    async fn update_password(&self, new_password: &str) -> Result<Identity>;

    /// Revoke the session remotely. The local session is dropped even when
    /// the revoke request fails; the remote error is still returned.
    async fn sign_out(&self) -> Result<()>;

    /// Remove any session data kept outside memory.
    async fn clear_local_storage(&self) -> Result<()>;

    /// Access token of the current session, if any.
    async fn access_token(&self) -> Option<String>;

    /// Stream of auth state changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

//! The Session Store: the single authoritative record of who is signed in.

use std::sync::Arc;

use serde::Deserialize;
use serene_common::{AuthEvent, AuthSession, Identity, Profile, ProfileUpdate};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::SessionState;
use crate::auth::{AuthService, OAuthCallback};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result, StoreError};
use crate::reconcile::ProfileReconciler;
use crate::store::ProfileStore;

/// Email/password registration.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
    pub username: String,
}

/// Sign-in by email or by username; email wins when both are given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignInRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// The service issued a session right away and the profile exists.
    SignedIn(Profile),
    /// The account awaits email confirmation; the profile is created on the
    /// first `SIGNED_IN` event.
    ConfirmationRequired { email: String },
}

/// Owns the published `SessionState` and keeps it consistent with the auth
/// service.
///
/// Every asynchronous continuation writes through a cancellation token
/// derived from the store's liveness token; after `teardown` those writes
/// are dropped. Only `sign_out` writes unconditionally.
pub struct SessionStore {
    auth: Arc<dyn AuthService>,
    reconciler: ProfileReconciler,
    settings: AuthConfig,
    state: watch::Sender<SessionState>,
    alive: CancellationToken,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthService>, profiles: Arc<dyn ProfileStore>, settings: AuthConfig) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        Self {
            auth,
            reconciler: ProfileReconciler::new(profiles),
            settings,
            state,
            alive: CancellationToken::new(),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        !self.alive.is_cancelled()
    }

    /// Stop the event listener and ignore every later asynchronous write.
    pub fn teardown(&self) {
        tracing::info!("Session store torn down");
        self.alive.cancel();
    }

    /// Token scoping one asynchronous operation.
    fn operation(&self) -> CancellationToken {
        self.alive.child_token()
    }

    /// Apply `f` to the state unless `guard` was cancelled.
    fn update(&self, guard: &CancellationToken, f: impl FnOnce(&mut SessionState)) -> bool {
        if guard.is_cancelled() {
            tracing::debug!("Dropping session state write after teardown");
            return false;
        }
        self.state.send_modify(f);
        true
    }

    fn adopt(&self, guard: &CancellationToken, identity: &Identity) {
        self.update(guard, |s| {
            if s.profile.as_ref().is_some_and(|p| p.id != identity.id) {
                s.profile = None;
            }
            s.identity = Some(identity.clone());
        });
    }

    fn clear_identity(&self, guard: &CancellationToken) {
        self.update(guard, |s| *s = SessionState::signed_out());
    }

    fn record_error(&self, guard: &CancellationToken, error: &AuthError) {
        self.update(guard, |s| s.last_error = Some(error.clone()));
    }

    /// Reconcile `identity` and publish the result while it is still the
    /// signed-in identity.
    async fn reconcile_into_state(
        &self,
        guard: &CancellationToken,
        identity: &Identity,
        username_hint: Option<&str>,
    ) -> Result<Profile> {
        self.update(guard, |s| s.loading = true);
        let result = self.reconciler.reconcile(identity, username_hint).await;

        self.update(guard, |s| {
            let current = s.identity.as_ref().is_some_and(|i| i.id == identity.id);
            match result {
                Ok(ref profile) if current => {
                    s.profile = Some(profile.clone());
                    s.last_error = None;
                }
                Err(ref e) if current => {
                    s.profile = None;
                    s.last_error = Some(e.clone());
                }
                _ => {}
            }
            s.loading = false;
        });

        if let Err(ref e) = result {
            tracing::warn!("Profile reconciliation failed for {}: {}", identity.id, e);
        }
        result
    }

    async fn establish(
        &self,
        guard: &CancellationToken,
        session: &AuthSession,
        username_hint: Option<&str>,
    ) -> Result<Profile> {
        self.adopt(guard, &session.identity);
        self.reconcile_into_state(guard, &session.identity, username_hint).await
    }

    /// Restore an existing session at startup. Never fails: any error leaves
    /// the state signed out.
    pub async fn initialize(&self) {
        let guard = self.operation();

        match self.auth.get_session().await {
            Ok(Some(session)) => {
                tracing::info!("Restored session for {}", session.identity.id);
                // Failures are recorded in `last_error`.
                let _ = self.establish(&guard, &session, None).await;
            }
            Ok(None) => {
                tracing::info!("No stored session");
                self.clear_identity(&guard);
            }
            Err(e) => {
                tracing::warn!("Failed to restore session, continuing signed out: {}", e);
                self.clear_identity(&guard);
            }
        }
    }

    /// Spawn the task feeding the auth change stream into `on_auth_event`.
    ///
    /// Subscribe before `initialize` so no change is missed.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut changes = self.auth.subscribe();
        let alive = self.alive.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = alive.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => store.on_auth_event(change.event, change.session).await,
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("Auth change listener lagged, {} changes missed", missed);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Auth change listener stopped");
        })
    }

    /// Apply one auth state change.
    pub async fn on_auth_event(&self, event: AuthEvent, session: Option<AuthSession>) {
        let guard = self.operation();
        if guard.is_cancelled() {
            tracing::debug!(event = %event, "Ignoring auth change after teardown");
            return;
        }

        tracing::info!(event = %event, signed_in = session.is_some(), "Auth state changed");

        let session = match (event, session) {
            (AuthEvent::SignedOut, _) | (_, None) => {
                self.clear_identity(&guard);
                return;
            }
            (_, Some(session)) => session,
        };

        match event {
            AuthEvent::SignedIn | AuthEvent::UserUpdated => {
                // Always re-run to pick up provider metadata changes.
                let _ = self.establish(&guard, &session, None).await;
            }
            _ => {
                let has_profile = self
                    .state
                    .borrow()
                    .profile
                    .as_ref()
                    .is_some_and(|p| p.id == session.identity.id);
                self.adopt(&guard, &session.identity);
                if !has_profile {
                    let _ = self.reconcile_into_state(&guard, &session.identity, None).await;
                }
            }
        }
    }

    /// Register an email/password account.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome> {
        let guard = self.operation();
        let email = request.email.trim();
        let username = request.username.trim();

        validate_email(email)?;
        if username.is_empty() {
            return Err(AuthError::Validation("username is required".to_string()));
        }
        self.validate_new_password(&request.password, request.confirm_password.as_deref())?;

        if self
            .reconciler
            .store()
            .fetch_by_username(username)
            .await
            .map_err(store_unavailable)?
            .is_some()
        {
            return Err(AuthError::UsernameTaken(username.to_string()));
        }

        let result = self
            .auth
            .sign_up(email, &request.password, username, &self.settings.email_redirect_url)
            .await?;

        match result.session {
            Some(session) => {
                let profile = self.establish(&guard, &session, Some(username)).await?;
                Ok(SignUpOutcome::SignedIn(profile))
            }
            None => {
                match result.identity {
                    Some(ref identity) => {
                        tracing::info!("Sign-up for {} ({}) awaits email confirmation", email, identity.id)
                    }
                    None => tracing::info!("Sign-up for {} awaits email confirmation", email),
                }
                Ok(SignUpOutcome::ConfirmationRequired {
                    email: email.to_string(),
                })
            }
        }
    }

    /// Sign in with a password. A session without a usable profile is
    /// reported as `ProfileLoad`.
    pub async fn sign_in(&self, request: SignInRequest) -> Result<Profile> {
        let guard = self.operation();

        let email = match (non_blank(request.email.as_deref()), non_blank(request.username.as_deref())) {
            (Some(email), _) => email.to_string(),
            (None, Some(username)) => self.resolve_email(username).await?,
            (None, None) => {
                return Err(AuthError::Validation("email or username is required".to_string()));
            }
        };
        if request.password.is_empty() {
            return Err(AuthError::Validation("password is required".to_string()));
        }

        let session = self.auth.sign_in_with_password(&email, &request.password).await?;
        tracing::info!("Signed in {}", session.identity.id);
        self.establish(&guard, &session, None).await
    }

    async fn resolve_email(&self, username: &str) -> Result<String> {
        self.reconciler
            .store()
            .fetch_by_username(username)
            .await
            .map_err(store_unavailable)?
            .and_then(|profile| profile.email)
            .ok_or_else(|| AuthError::UsernameNotFound(username.to_string()))
    }

    /// URL to navigate to for an OAuth sign-in. Completion arrives later via
    /// `complete_oauth` or the change stream.
    pub fn sign_in_with_oauth(&self, provider: &str) -> Result<String> {
        let url = self
            .auth
            .authorize_url(provider, &self.settings.oauth_redirect_url)?;
        tracing::info!("Starting OAuth sign-in with {}", provider);
        Ok(url)
    }

    /// Finish an OAuth sign-in from the parameters of the callback route.
    pub async fn complete_oauth(&self, callback: OAuthCallback) -> Result<Profile> {
        let guard = self.operation();

        if let Some(message) = callback.error_message() {
            let error = AuthError::OAuthRedirect(message);
            self.record_error(&guard, &error);
            return Err(error);
        }

        let Some(access_token) = callback.access_token.as_deref() else {
            let error = AuthError::OAuthRedirect("callback carried no access token".to_string());
            self.record_error(&guard, &error);
            return Err(error);
        };

        let session = match self
            .auth
            .set_session(access_token, callback.refresh_token.as_deref(), callback.expires_in)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let error = match e {
                    AuthError::Network(message) => AuthError::OAuthRedirect(message),
                    other => other,
                };
                self.record_error(&guard, &error);
                return Err(error);
            }
        };

        tracing::info!("OAuth sign-in completed for {}", session.identity.id);
        self.establish(&guard, &session, None).await
    }

    /// Sign out. Local state is always cleared, whatever the network does.
    pub async fn sign_out(&self) {
        if let Err(e) = self.auth.sign_out().await {
            tracing::warn!("Remote sign-out failed, clearing local session anyway: {}", e);
        }
        if let Err(e) = self.auth.clear_local_storage().await {
            tracing::warn!("Failed to clear local session storage: {}", e);
        }

        self.state.send_replace(SessionState::signed_out());
        tracing::info!("Signed out");
    }

    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = email.trim();
        validate_email(email)?;
        self.auth
            .reset_password_for_email(email, &self.settings.email_redirect_url)
            .await
    }

    pub async fn update_password(&self, new_password: &str, confirm_password: Option<&str>) -> Result<()> {
        self.validate_new_password(new_password, confirm_password)?;
        self.auth.update_password(new_password).await.map(|_| ())
    }

    /// Live-typing availability check. "Not found" is the success path.
    pub async fn check_username_available(&self, username: &str) -> Result<bool> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::Validation("username is required".to_string()));
        }

        let owner = self
            .reconciler
            .store()
            .fetch_by_username(username)
            .await
            .map_err(store_unavailable)?;

        let current_id = self.state.borrow().identity.as_ref().map(|i| i.id.clone());
        Ok(match owner {
            None => true,
            Some(profile) => current_id.as_deref() == Some(profile.id.as_str()),
        })
    }

    /// Update the signed-in user's profile.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        let guard = self.operation();
        let current = self.state.borrow().profile.clone().ok_or(AuthError::NotSignedIn)?;

        if update.is_empty() {
            return Ok(current);
        }
        if let Some(ref username) = update.username {
            if username.trim().is_empty() {
                return Err(AuthError::Validation("username cannot be empty".to_string()));
            }
            if *username != current.username && !self.check_username_available(username).await? {
                return Err(AuthError::UsernameTaken(username.clone()));
            }
        }

        let updated = self
            .reconciler
            .store()
            .update_by_id(&current.id, &update)
            .await
            .map_err(|e| match e {
                StoreError::UsernameTaken(name) => AuthError::UsernameTaken(name),
                StoreError::NotFound(id) => AuthError::ProfileLoad(format!("profile {} not found", id)),
                other => store_unavailable(other),
            })?;

        self.update(&guard, |s| {
            if s.identity.as_ref().is_some_and(|i| i.id == updated.id) {
                s.profile = Some(updated.clone());
            }
        });
        Ok(updated)
    }

    /// Re-fetch the signed-in identity's profile.
    pub async fn refresh_profile(&self) -> Result<Option<Profile>> {
        let guard = self.operation();
        let identity = self.state.borrow().identity.clone().ok_or(AuthError::NotSignedIn)?;

        let profile = self
            .reconciler
            .store()
            .fetch_by_id(&identity.id)
            .await
            .map_err(|e| AuthError::ProfileLoad(e.to_string()))?;

        self.update(&guard, |s| {
            if s.identity.as_ref().is_some_and(|i| i.id == identity.id) {
                s.profile = profile.clone();
            }
        });
        Ok(profile)
    }

    fn validate_new_password(&self, password: &str, confirm: Option<&str>) -> Result<()> {
        let min = self.settings.min_password_length;
        if password.chars().count() < min {
            return Err(AuthError::Validation(format!(
                "password must be at least {} characters",
                min
            )));
        }
        if confirm.is_some_and(|c| c != password) {
            return Err(AuthError::Validation("passwords do not match".to_string()));
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AuthError::Validation("a valid email address is required".to_string())),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn store_unavailable(e: StoreError) -> AuthError {
    AuthError::Network(e.to_string())
}

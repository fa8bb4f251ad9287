//! Test helpers: a scripted auth service and fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serene_common::{AuthChange, AuthEvent, AuthSession, Identity, IdentityMetadata, EMAIL_PROVIDER};
use tokio::sync::broadcast;

use crate::auth::{AuthService, SignUpResult};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

struct FakeAccount {
    password: String,
    identity: Identity,
}

/// In-memory `AuthService` that behaves like the hosted one and records
/// which operations were called.
pub struct FakeAuthService {
    accounts: Mutex<HashMap<String, FakeAccount>>,
    oauth_tokens: Mutex<HashMap<String, Identity>>,
    session: Mutex<Option<AuthSession>>,
    calls: Mutex<Vec<&'static str>>,
    require_confirmation: AtomicBool,
    fail_get_session: AtomicBool,
    fail_sign_out: AtomicBool,
    events: broadcast::Sender<AuthChange>,
}

impl FakeAuthService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(HashMap::new()),
            oauth_tokens: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            require_confirmation: AtomicBool::new(false),
            fail_get_session: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            events,
        }
    }

    pub fn add_account(&self, email: &str, password: &str, identity: Identity) {
        self.accounts.lock().unwrap().insert(
            email.to_string(),
            FakeAccount {
                password: password.to_string(),
                identity,
            },
        );
    }

    pub fn add_oauth_token(&self, token: &str, identity: Identity) {
        self.oauth_tokens.lock().unwrap().insert(token.to_string(), identity);
    }

    /// Session returned by `get_session`, as if restored from storage.
    pub fn set_stored_session(&self, session: Option<AuthSession>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn require_confirmation(&self, on: bool) {
        self.require_confirmation.store(on, Ordering::SeqCst);
    }

    pub fn fail_get_session(&self, on: bool) {
        self.fail_get_session.store(on, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, on: bool) {
        self.fail_sign_out.store(on, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Push a change onto the stream without touching the session.
    pub fn emit(&self, event: AuthEvent, session: Option<AuthSession>) {
        let _ = self.events.send(AuthChange::new(event, session));
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn start_session(&self, identity: Identity) -> AuthSession {
        let session = session_for(identity);
        *self.session.lock().unwrap() = Some(session.clone());
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        session
    }
}

impl Default for FakeAuthService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for FakeAuthService {
    async fn get_session(&self) -> Result<Option<AuthSession>> {
        self.record("get_session");
        if self.fail_get_session.load(Ordering::SeqCst) {
            return Err(AuthError::Network("connection refused".to_string()));
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        _redirect_to: &str,
    ) -> Result<SignUpResult> {
        self.record("sign_up");
        if self.accounts.lock().unwrap().contains_key(email) {
            return Err(AuthError::from_service(Some("user_already_exists"), "User already registered"));
        }

        let mut identity = identity(&uuid::Uuid::new_v4().to_string(), email, EMAIL_PROVIDER);
        identity.metadata.username = Some(username.to_string());
        self.add_account(email, password, identity.clone());

        if self.require_confirmation.load(Ordering::SeqCst) {
            return Ok(SignUpResult {
                identity: Some(identity),
                session: None,
            });
        }

        let session = self.start_session(identity.clone());
        Ok(SignUpResult {
            identity: Some(identity),
            session: Some(session),
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession> {
        self.record("sign_in_with_password");
        let identity = {
            let accounts = self.accounts.lock().unwrap();
            match accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(AuthError::from_service(Some("invalid_credentials"), "Invalid login credentials")),
            }
        };
        Ok(self.start_session(identity))
    }

    fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String> {
        self.record("authorize_url");
        if provider.trim().is_empty() {
            return Err(AuthError::OAuthRedirect("provider is required".to_string()));
        }
        Ok(format!(
            "https://auth.test/authorize?provider={}&redirect_to={}",
            provider, redirect_to
        ))
    }

    async fn set_session(
        &self,
        access_token: &str,
        _refresh_token: Option<&str>,
        _expires_in: Option<i64>,
    ) -> Result<AuthSession> {
        self.record("set_session");
        let identity = self
            .oauth_tokens
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or_else(|| AuthError::Network("invalid JWT".to_string()))?;
        Ok(self.start_session(identity))
    }

    async fn refresh_session(&self) -> Result<AuthSession> {
        self.record("refresh_session");
        let session = self.session.lock().unwrap().clone().ok_or(AuthError::NotSignedIn)?;
        self.emit(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    async fn reset_password_for_email(&self, _email: &str, _redirect_to: &str) -> Result<()> {
        self.record("reset_password_for_email");
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<Identity> {
        self.record("update_password");
        let session = self.session.lock().unwrap().clone().ok_or(AuthError::NotSignedIn)?;
        if let Some(email) = session.identity.email.as_deref() {
            if let Some(account) = self.accounts.lock().unwrap().get_mut(email) {
                account.password = new_password.to_string();
            }
        }
        Ok(session.identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.record("sign_out");
        *self.session.lock().unwrap() = None;
        self.emit(AuthEvent::SignedOut, None);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    async fn clear_local_storage(&self) -> Result<()> {
        self.record("clear_local_storage");
        Ok(())
    }

    async fn access_token(&self) -> Option<String> {
        self.session.lock().unwrap().as_ref().map(|s| s.access_token.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

pub fn identity(id: &str, email: &str, provider: &str) -> Identity {
    Identity {
        id: id.to_string(),
        email: Some(email.to_string()),
        provider: provider.to_string(),
        metadata: IdentityMetadata::default(),
    }
}

pub fn session_for(identity: Identity) -> AuthSession {
    AuthSession {
        access_token: format!("access-{}", identity.id),
        refresh_token: format!("refresh-{}", identity.id),
        expires_at: Some(chrono::Utc::now().timestamp() + 3600),
        identity,
    }
}

pub fn auth_settings() -> AuthConfig {
    AuthConfig {
        email_redirect_url: "http://127.0.0.1:8787/auth/callback".to_string(),
        oauth_redirect_url: "http://127.0.0.1:8787/auth/callback".to_string(),
        post_login_path: "/".to_string(),
        min_password_length: 6,
        session_file: None,
    }
}

//! Client for the hosted backend's auth REST API.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serene_common::{AuthChange, AuthEvent, AuthSession, Identity, IdentityMetadata, EMAIL_PROVIDER};
use tokio::sync::{broadcast, RwLock};

use super::{AuthService, SignUpResult};
use crate::error::{AuthError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Auth client holding the current session in memory and optionally on disk.
pub struct HostedAuthClient {
    http_client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    session_file: Option<PathBuf>,
    events: broadcast::Sender<AuthChange>,
}

impl HostedAuthClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            session_file: None,
            events,
        }
    }

    /// Persist session tokens to `path` so a restart can restore them.
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn request(&self, builder: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(self.anon_key.as_str()))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(service_error(response).await)
        }
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    /// Make `session` current, persist it and notify subscribers.
    async fn store_session(&self, session: AuthSession, event: AuthEvent) {
        *self.session.write().await = Some(session.clone());
        self.persist(Some(&session)).await;
        self.emit(event, Some(session));
    }

    fn emit(&self, event: AuthEvent, session: Option<AuthSession>) {
        // No receivers is not an error: nobody is listening yet.
        let receivers = self.events.send(AuthChange::new(event, session)).unwrap_or(0);
        tracing::debug!(event = %event, receivers, "Auth change emitted");
    }

    async fn persist(&self, session: Option<&AuthSession>) {
        let Some(ref path) = self.session_file else {
            return;
        };

        let result = match session {
            Some(session) => match serde_json::to_vec(session) {
                Ok(bytes) => {
                    if let Some(parent) = path.parent() {
                        let _ = tokio::fs::create_dir_all(parent).await;
                    }
                    tokio::fs::write(path, bytes).await
                }
                Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            },
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };

        if let Err(e) = result {
            tracing::warn!("Failed to update session file {}: {}", path.display(), e);
        }
    }

    async fn load_persisted(&self) -> Option<AuthSession> {
        let path = self.session_file.as_ref()?;
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read session file {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("Ignoring corrupt session file {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Identity> {
        let response = self
            .send(self.request(self.http_client.get(self.endpoint("user")), Some(access_token)))
            .await?;
        let user: WireUser = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid user response: {}", e)))?;
        Ok(user.into_identity())
    }
}

// ============================================================================
// Auth API types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: WireAppMetadata,
    #[serde(default)]
    user_metadata: IdentityMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct WireAppMetadata {
    #[serde(default)]
    provider: Option<String>,
}

impl WireUser {
    fn into_identity(self) -> Identity {
        Identity {
            id: self.id,
            email: self.email,
            provider: self
                .app_metadata
                .provider
                .unwrap_or_else(|| EMAIL_PROVIDER.to_string()),
            metadata: self.user_metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: WireUser,
}

impl WireSession {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            identity: self.user.into_identity(),
        }
    }
}

/// Sign-up returns a session when confirmation is disabled, the bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireSignUp {
    Session(WireSession),
    User(WireUser),
}

#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: serde_json::Value,
}

async fn service_error(response: Response) -> AuthError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let wire: WireError = serde_json::from_str(&body).unwrap_or_default();

    let code = wire.error_code.or_else(|| wire.error.clone());
    let message = wire
        .msg
        .or(wire.message)
        .or(wire.error_description)
        .or(wire.error)
        .unwrap_or_else(|| format!("{}: {}", status, body));

    tracing::debug!(status = %status, code = ?code, "Auth service returned an error");
    AuthError::from_service(code.as_deref(), &message)
}

// ============================================================================
// AuthService implementation
// ============================================================================

#[async_trait]
impl AuthService for HostedAuthClient {
    async fn get_session(&self) -> Result<Option<AuthSession>> {
        let session = match self.current_session().await {
            Some(session) => Some(session),
            None => self.load_persisted().await,
        };

        let Some(session) = session else {
            return Ok(None);
        };

        *self.session.write().await = Some(session.clone());
        if session.is_expired_at(Utc::now().timestamp()) {
            tracing::info!("Stored session is stale, refreshing");
            return match self.refresh_session().await {
                Ok(refreshed) => Ok(Some(refreshed)),
                Err(e) => {
                    tracing::warn!("Session refresh failed, discarding stored session: {}", e);
                    self.session.write().await.take();
                    self.persist(None).await;
                    self.emit(AuthEvent::SignedOut, None);
                    Err(e)
                }
            };
        }
        Ok(Some(session))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        redirect_to: &str,
    ) -> Result<SignUpResult> {
        let body = SignUpBody {
            email,
            password,
            data: json!({ "username": username }),
        };
        let builder = self
            .http_client
            .post(self.endpoint("signup"))
            .query(&[("redirect_to", redirect_to)])
            .json(&body);

        let response = self.send(self.request(builder, None)).await?;
        let parsed: WireSignUp = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid sign-up response: {}", e)))?;

        match parsed {
            WireSignUp::Session(session) => {
                let session = session.into_session();
                tracing::info!("Signed up {} with an immediate session", session.identity.id);
                self.store_session(session.clone(), AuthEvent::SignedIn).await;
                Ok(SignUpResult {
                    identity: Some(session.identity.clone()),
                    session: Some(session),
                })
            }
            WireSignUp::User(user) => {
                let identity = user.into_identity();
                tracing::info!("Signed up {}, awaiting email confirmation", identity.id);
                Ok(SignUpResult {
                    identity: Some(identity),
                    session: None,
                })
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession> {
        let builder = self
            .http_client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));

        let response = self.send(self.request(builder, None)).await?;
        let session: WireSession = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid token response: {}", e)))?;

        let session = session.into_session();
        self.store_session(session.clone(), AuthEvent::SignedIn).await;
        Ok(session)
    }

    fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String> {
        let provider = provider.trim();
        if provider.is_empty() {
            return Err(AuthError::OAuthRedirect("provider is required".to_string()));
        }

        Url::parse_with_params(
            &self.endpoint("authorize"),
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map(String::from)
        .map_err(|e| AuthError::OAuthRedirect(e.to_string()))
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<i64>,
    ) -> Result<AuthSession> {
        let identity = self.fetch_user(access_token).await?;
        let session = AuthSession {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.unwrap_or_default().to_string(),
            expires_at: expires_in.map(|secs| Utc::now().timestamp() + secs),
            identity,
        };
        self.store_session(session.clone(), AuthEvent::SignedIn).await;
        Ok(session)
    }

    async fn refresh_session(&self) -> Result<AuthSession> {
        let refresh_token = self
            .current_session()
            .await
            .map(|s| s.refresh_token)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NotSignedIn)?;

        let builder = self
            .http_client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));

        let response = self.send(self.request(builder, None)).await?;
        let session: WireSession = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid token response: {}", e)))?;

        let session = session.into_session();
        self.store_session(session.clone(), AuthEvent::TokenRefreshed).await;
        Ok(session)
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<()> {
        let builder = self
            .http_client
            .post(self.endpoint("recover"))
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email }));

        self.send(self.request(builder, None)).await?;
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<Identity> {
        let mut session = self.current_session().await.ok_or(AuthError::NotSignedIn)?;

        let builder = self
            .http_client
            .put(self.endpoint("user"))
            .json(&json!({ "password": new_password }));
        let response = self
            .send(self.request(builder, Some(&session.access_token)))
            .await?;
        let user: WireUser = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid user response: {}", e)))?;

        session.identity = user.into_identity();
        self.store_session(session.clone(), AuthEvent::UserUpdated).await;
        Ok(session.identity)
    }

    async fn sign_out(&self) -> Result<()> {
        let previous = self.session.write().await.take();

        let remote = match previous {
            Some(ref session) => {
                let builder = self.http_client.post(self.endpoint("logout"));
                self.send(self.request(builder, Some(&session.access_token)))
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };

        self.persist(None).await;
        self.emit(AuthEvent::SignedOut, None);
        remote
    }

    async fn clear_local_storage(&self) -> Result<()> {
        self.persist(None).await;
        Ok(())
    }

    async fn access_token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.access_token.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        let client = HostedAuthClient::new("https://project.example.co/", "anon");
        assert_eq!(client.endpoint("token"), "https://project.example.co/auth/v1/token");
    }

    #[test]
    fn test_authorize_url_encodes_redirect() {
        let client = HostedAuthClient::new("https://project.example.co", "anon");
        let url = client
            .authorize_url("google", "http://127.0.0.1:8787/auth/callback")
            .unwrap();
        assert_eq!(
            url,
            "https://project.example.co/auth/v1/authorize?provider=google&redirect_to=http%3A%2F%2F127.0.0.1%3A8787%2Fauth%2Fcallback"
        );
    }

    #[test]
    fn test_authorize_url_requires_provider() {
        let client = HostedAuthClient::new("https://project.example.co", "anon");
        let err = client.authorize_url(" ", "http://localhost/cb").unwrap_err();
        assert_eq!(err.code(), "oauth_redirect");
    }

    #[test]
    fn test_wire_user_defaults_to_email_provider() {
        let user: WireUser = serde_json::from_str(
            r#"{"id": "u1", "email": "a@b.c", "user_metadata": {"username": "abc", "extra": 1}}"#,
        )
        .unwrap();
        let identity = user.into_identity();
        assert_eq!(identity.provider, "email");
        assert_eq!(identity.metadata.username(), Some("abc"));
    }

    #[test]
    fn test_sign_up_response_shapes() {
        let user_only: WireSignUp =
            serde_json::from_str(r#"{"id": "u1", "email": "a@b.c", "app_metadata": {"provider": "email"}}"#)
                .unwrap();
        assert!(matches!(user_only, WireSignUp::User(_)));

        let with_session: WireSignUp = serde_json::from_str(
            r#"{"access_token": "a", "refresh_token": "r", "expires_in": 3600, "user": {"id": "u1"}}"#,
        )
        .unwrap();
        assert!(matches!(with_session, WireSignUp::Session(_)));
    }
}

//! Sign-up, sign-in, sign-out and the OAuth round trip.

use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serene_common::Profile;

use crate::auth::OAuthCallback;
use crate::error::Result;
use crate::session::{SignInRequest, SignUpOutcome, SignUpRequest};
use crate::AppState;

/// Response of `POST /auth/signup`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignUpResponse {
    SignedIn { profile: Profile },
    ConfirmationRequired { email: String },
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UsernameAvailability {
    pub username: String,
    pub available: bool,
}

/// Moves fragment parameters into the query so the server can read them.
const FRAGMENT_SHIM: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Signing in</title></head>
<body><script>
var params = window.location.hash.substring(1);
window.location.replace(window.location.pathname + "?" + (params || "error=missing_callback_parameters"));
</script></body></html>
"#;

/// POST /auth/signup
async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<SignUpResponse>)> {
    let (status, body) = match state.session_store.sign_up(request).await? {
        SignUpOutcome::SignedIn(profile) => (StatusCode::CREATED, SignUpResponse::SignedIn { profile }),
        SignUpOutcome::ConfirmationRequired { email } => {
            (StatusCode::ACCEPTED, SignUpResponse::ConfirmationRequired { email })
        }
    };
    Ok((status, Json(body)))
}

/// POST /auth/signin
async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<Profile>> {
    let profile = state.session_store.sign_in(request).await?;
    Ok(Json(profile))
}

/// POST /auth/signout - always succeeds locally
async fn sign_out(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session_store.sign_out().await;
    StatusCode::NO_CONTENT
}

/// POST /auth/reset-password
async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<StatusCode> {
    state.session_store.reset_password(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/password
async fn update_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdatePasswordRequest>,
) -> Result<StatusCode> {
    state
        .session_store
        .update_password(&request.password, request.confirm_password.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/username-available/:username
async fn username_available(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<UsernameAvailability>> {
    let available = state.session_store.check_username_available(&username).await?;
    Ok(Json(UsernameAvailability { username, available }))
}

/// GET /auth/oauth/:provider - send the browser to the provider
async fn oauth_start(State(state): State<Arc<AppState>>, Path(provider): Path<String>) -> Result<Redirect> {
    let url = state.session_store.sign_in_with_oauth(&provider)?;
    Ok(Redirect::to(&url))
}

/// GET /auth/callback
async fn oauth_callback(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    let query = query.unwrap_or_default();
    if query.is_empty() {
        return Html(FRAGMENT_SHIM).into_response();
    }

    let result = match OAuthCallback::from_encoded(&query) {
        Ok(callback) => state.session_store.complete_oauth(callback).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(profile) => {
            tracing::info!("OAuth callback completed for {}", profile.username);
            Redirect::to(&state.config.auth.post_login_path).into_response()
        }
        Err(e) => {
            tracing::warn!("OAuth callback failed: {}", e);
            Redirect::to(&login_error_location(&e.to_string())).into_response()
        }
    }
}

/// `/login?error=...` with the message form-encoded.
fn login_error_location(message: &str) -> String {
    let mut url = match Url::parse("http://localhost/login") {
        Ok(url) => url,
        Err(_) => return "/login".to_string(),
    };
    url.query_pairs_mut().append_pair("error", message);
    format!("{}?{}", url.path(), url.query().unwrap_or_default())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/signup", post(sign_up))
        .route("/signin", post(sign_in))
        .route("/signout", post(sign_out))
        .route("/reset-password", post(reset_password))
        .route("/password", post(update_password))
        .route("/username-available/:username", get(username_available))
        .route("/oauth/:provider", get(oauth_start))
        .route("/callback", get(oauth_callback))
        .with_state(state)
}

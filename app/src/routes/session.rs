//! Session state, profile and practice endpoints for the signed-in user.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serene_common::{MeditationSession, NewMeditationSession, Profile, ProfileUpdate};

use crate::error::{AuthError, Result, StoreError};
use crate::session::SessionState;
use crate::stats::{self, PracticeStats};
use crate::AppState;

/// A single sitting cannot outlast a day.
const MAX_SESSION_MINUTES: u32 = 24 * 60;

/// Body of `POST /practice`.
#[derive(Debug, Deserialize)]
pub struct RecordPracticeRequest {
    pub duration_minutes: u32,
    /// Defaults to now.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<bool>,
}

/// GET /session - the published session state
async fn current_session(State(state): State<Arc<AppState>>) -> Json<SessionState> {
    Json(state.session_store.state())
}

/// GET /stats - practice statistics in the local timezone
async fn practice_stats(State(state): State<Arc<AppState>>) -> Result<Json<PracticeStats>> {
    let user_id = signed_in_user(&state)?;
    let sessions = state
        .practice_log
        .list_for_user(&user_id)
        .await
        .map_err(practice_unavailable)?;

    Ok(Json(stats::summarize(&sessions, &Local::now())))
}

/// POST /practice - record a sitting
async fn record_practice(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecordPracticeRequest>,
) -> Result<(StatusCode, Json<MeditationSession>)> {
    let user_id = signed_in_user(&state)?;
    if request.duration_minutes == 0 || request.duration_minutes > MAX_SESSION_MINUTES {
        return Err(AuthError::Validation(format!(
            "duration_minutes must be between 1 and {}",
            MAX_SESSION_MINUTES
        )));
    }

    let session = state
        .practice_log
        .record(NewMeditationSession {
            user_id,
            completed_at: request.completed_at.unwrap_or_else(Utc::now),
            duration_minutes: request.duration_minutes,
            completed: request.completed.unwrap_or(true),
        })
        .await
        .map_err(practice_unavailable)?;

    tracing::info!("Recorded {} minute session {}", session.duration_minutes, session.id);
    Ok((StatusCode::CREATED, Json(session)))
}

/// PATCH /profile - edit username, display name or avatar
async fn update_profile(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>> {
    let profile = state.session_store.update_profile(update).await?;
    Ok(Json(profile))
}

fn signed_in_user(state: &AppState) -> Result<String> {
    state
        .session_store
        .state()
        .identity
        .map(|identity| identity.id)
        .ok_or(AuthError::NotSignedIn)
}

fn practice_unavailable(e: StoreError) -> AuthError {
    tracing::error!("Practice log error: {}", e);
    AuthError::Network(e.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/session", get(current_session))
        .route("/stats", get(practice_stats))
        .route("/practice", post(record_practice))
        .route("/profile", patch(update_profile))
        .with_state(state)
}

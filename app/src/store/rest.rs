//! Hosted row API (`/rest/v1/...`) implementation of the stores.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serene_common::{MeditationSession, NewMeditationSession, NewProfile, Profile, ProfileUpdate};

use super::{PracticeLog, ProfileStore, StoreResult};
use crate::auth::AuthService;
use crate::error::StoreError;

const UNIQUE_VIOLATION: &str = "23505";

/// Store backed by the hosted backend's tables.
///
/// Requests carry the signed-in user's access token when an auth service is
/// attached, so row-level policies see the real user.
pub struct RestStore {
    http_client: Client,
    base_url: String,
    anon_key: String,
    auth: Option<Arc<dyn AuthService>>,
}

#[derive(Debug, Default, Deserialize)]
struct RestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = match self.auth {
            Some(ref auth) => auth.access_token().await,
            None => None,
        };
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or_else(|| self.anon_key.clone()))
    }

    /// Send and decode a JSON array of rows. `username` names the value a
    /// unique violation refers to.
    async fn rows<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        username: Option<&str>,
    ) -> StoreResult<Vec<T>> {
        let response = self.authorized(builder).await.send().await?;
        let response = check(response, username).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    async fn fetch_one(&self, column: &str, value: &str) -> StoreResult<Option<Profile>> {
        let builder = self
            .http_client
            .get(self.table("profiles"))
            .query(&[(column, format!("eq.{}", value)), ("select", "*".to_string())]);
        let mut profiles: Vec<Profile> = self.rows(builder, None).await?;
        Ok(if profiles.is_empty() { None } else { Some(profiles.swap_remove(0)) })
    }
}

async fn check(response: Response, username: Option<&str>) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error: RestError = serde_json::from_str(&body).unwrap_or_default();

    if status.as_u16() == 409 || error.code.as_deref() == Some(UNIQUE_VIOLATION) {
        if let Some(username) = username {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }
    }

    Err(StoreError::Request(format!(
        "{}: {}",
        status,
        error.message.unwrap_or(body)
    )))
}

#[async_trait]
impl ProfileStore for RestStore {
    async fn fetch_by_id(&self, id: &str) -> StoreResult<Option<Profile>> {
        self.fetch_one("id", id).await
    }

    async fn fetch_by_username(&self, username: &str) -> StoreResult<Option<Profile>> {
        self.fetch_one("username", username).await
    }

    async fn insert_if_absent(&self, profile: &NewProfile) -> StoreResult<bool> {
        let builder = self
            .http_client
            .post(self.table("profiles"))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&[profile]);

        let inserted: Vec<Profile> = self.rows(builder, Some(&profile.username)).await?;
        if !inserted.is_empty() {
            tracing::info!("Created profile {} ({})", profile.id, profile.username);
        }
        Ok(!inserted.is_empty())
    }

    async fn update_by_id(&self, id: &str, update: &ProfileUpdate) -> StoreResult<Profile> {
        let mut body = serde_json::to_value(update)
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert("updated_at".to_string(), serde_json::json!(Utc::now()));
        }

        let builder = self
            .http_client
            .patch(self.table("profiles"))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&body);

        let mut updated: Vec<Profile> = self.rows(builder, update.username.as_deref()).await?;
        if updated.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(updated.swap_remove(0))
    }
}

#[async_trait]
impl PracticeLog for RestStore {
    async fn record(&self, session: NewMeditationSession) -> StoreResult<MeditationSession> {
        let session = session.into_session();
        let builder = self
            .http_client
            .post(self.table("meditation_sessions"))
            .header("Prefer", "return=representation")
            .json(&[&session]);

        let mut stored: Vec<MeditationSession> = self.rows(builder, None).await?;
        if stored.is_empty() {
            return Err(StoreError::InvalidResponse("insert returned no rows".to_string()));
        }
        Ok(stored.swap_remove(0))
    }

    async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<MeditationSession>> {
        let builder = self.http_client.get(self.table("meditation_sessions")).query(&[
            ("user_id", format!("eq.{}", user_id)),
            ("order", "completed_at.desc".to_string()),
            ("select", "*".to_string()),
        ]);
        self.rows(builder, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url() {
        let store = RestStore::new("https://project.example.co/", "anon");
        assert_eq!(store.table("profiles"), "https://project.example.co/rest/v1/profiles");
    }
}

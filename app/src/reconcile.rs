//! Profile reconciliation: exactly one profile per identity, created lazily.

use std::sync::Arc;

use chrono::Utc;
use serene_common::{Identity, NewProfile, Profile};

use crate::error::{AuthError, Result, StoreError};
use crate::store::ProfileStore;

/// Length of the id prefix appended to a derived username that is taken.
const DISAMBIGUATION_LEN: usize = 8;

/// Where a username came from. Only derived names may be disambiguated;
/// a caller-chosen name was validated as unique before sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
enum UsernameSource {
    Chosen(String),
    Derived(String),
}

/// Pick the username for a new profile.
///
/// Order: explicit hint, provider username, provider display name, then
/// (for non-"email" providers) the email local part.
fn username_source(identity: &Identity, hint: Option<&str>) -> Option<UsernameSource> {
    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        return Some(UsernameSource::Chosen(hint.to_string()));
    }
    if let Some(name) = identity.metadata.username() {
        return Some(if identity.is_email_provider() {
            UsernameSource::Chosen(name.to_string())
        } else {
            UsernameSource::Derived(name.to_string())
        });
    }
    if let Some(name) = identity.metadata.display_name() {
        return Some(UsernameSource::Derived(name.to_string()));
    }
    if !identity.is_email_provider() {
        return identity
            .email_local_part()
            .map(|local| UsernameSource::Derived(local.to_string()));
    }
    None
}

/// Fetch-or-create of the profile belonging to an identity.
pub struct ProfileReconciler {
    profiles: Arc<dyn ProfileStore>,
}

impl ProfileReconciler {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    /// Return the identity's profile, creating it on first sight.
    ///
    /// Safe to run concurrently for the same identity: the insert is a no-op
    /// when the id already exists and the result is always re-fetched.
    pub async fn reconcile(&self, identity: &Identity, username_hint: Option<&str>) -> Result<Profile> {
        if let Some(profile) = self.profiles.fetch_by_id(&identity.id).await.map_err(load_error)? {
            tracing::debug!("Profile {} already exists", identity.id);
            return Ok(profile);
        }

        let source = username_source(identity, username_hint).ok_or_else(|| {
            AuthError::ProfileLoad(format!("no username available for {}", identity.id))
        })?;
        let username = self.available_username(identity, source).await?;

        let new_profile = NewProfile {
            id: identity.id.clone(),
            email: identity.email.clone(),
            display_name: identity
                .metadata
                .display_name()
                .map(String::from)
                .or_else(|| Some(username.clone())),
            username,
            avatar_url: identity.metadata.avatar().map(String::from),
            provider: identity.provider.clone(),
            updated_at: Utc::now(),
        };

        let created = self
            .profiles
            .insert_if_absent(&new_profile)
            .await
            .map_err(load_error)?;
        if created {
            tracing::info!(
                "Created profile for {} via {} as {}",
                identity.id,
                identity.provider,
                new_profile.username
            );
        }

        self.profiles
            .fetch_by_id(&identity.id)
            .await
            .map_err(load_error)?
            .ok_or_else(|| AuthError::ProfileLoad(format!("profile {} missing after insert", identity.id)))
    }

    async fn available_username(&self, identity: &Identity, source: UsernameSource) -> Result<String> {
        let name = match source {
            UsernameSource::Chosen(name) => return Ok(name),
            UsernameSource::Derived(name) => name,
        };

        match self.profiles.fetch_by_username(&name).await.map_err(load_error)? {
            Some(owner) if owner.id != identity.id => {
                let suffix: String = identity.id.chars().take(DISAMBIGUATION_LEN).collect();
                let disambiguated = format!("{}-{}", name, suffix);
                tracing::info!("Username {} is taken, using {}", name, disambiguated);
                Ok(disambiguated)
            }
            _ => Ok(name),
        }
    }
}

fn load_error(e: StoreError) -> AuthError {
    AuthError::ProfileLoad(e.to_string())
}

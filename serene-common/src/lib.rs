//! Serene Common Types
//!
//! Shared types used by the session core and its storage backends.

pub mod event;
pub mod identity;
pub mod practice;
pub mod profile;

pub use event::{AuthChange, AuthEvent};
pub use identity::{AuthSession, Identity, IdentityMetadata, EMAIL_PROVIDER};
pub use practice::{MeditationSession, NewMeditationSession};
pub use profile::{NewProfile, Profile, ProfileUpdate};

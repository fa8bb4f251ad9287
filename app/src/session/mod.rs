//! Process-wide session state and the store that drives it.

mod state;
mod store;

pub use state::SessionState;
pub use store::{SessionStore, SignInRequest, SignUpOutcome, SignUpRequest};

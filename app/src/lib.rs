pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod routes;
pub mod session;
pub mod stats;
pub mod store;
pub mod test_util;

pub use auth::{AuthService, HostedAuthClient, OAuthCallback};
pub use config::{Config, StorageBackend};
pub use error::{AuthError, StoreError};
pub use reconcile::ProfileReconciler;
pub use session::{SessionState, SessionStore};
pub use stats::PracticeStats;
pub use store::{PracticeLog, ProfileStore, RestStore, SqliteStore};

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// The one session of this process.
    pub session_store: Arc<SessionStore>,
    /// Meditation sessions, keyed by user.
    pub practice_log: Arc<dyn PracticeLog>,
}

/// All routes with CORS, tracing and request logging applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::session::router(state.clone()))
        .nest("/auth", routes::auth::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

use std::sync::Arc;

use tokio::net::TcpListener;

use serene_app::{
    build_router, logging, AppState, AuthService, Config, HostedAuthClient, PracticeLog, ProfileStore,
    RestStore, SessionStore, SqliteStore, StorageBackend,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;
    logging::init(&config.logging.level);

    tracing::info!("Starting Serene session core");

    // Auth client, optionally persisting tokens across restarts
    let mut hosted = HostedAuthClient::new(&config.service.url, &config.service.anon_key);
    if let Some(ref path) = config.auth.session_file {
        tracing::info!("Persisting session to {}", path);
        hosted = hosted.with_session_file(path);
    }
    let auth: Arc<dyn AuthService> = Arc::new(hosted);

    // Profile and practice storage
    let (profiles, practice_log) = match config.storage.backend {
        StorageBackend::Rest => {
            let store = Arc::new(RestStore::new(&config.service.url, &config.service.anon_key).with_auth(auth.clone()));
            (store.clone() as Arc<dyn ProfileStore>, store as Arc<dyn PracticeLog>)
        }
        StorageBackend::Sqlite => {
            let store = Arc::new(SqliteStore::new(&config.storage.database_url)?);
            tracing::info!("Using local database {}", config.storage.database_url);
            (store.clone() as Arc<dyn ProfileStore>, store as Arc<dyn PracticeLog>)
        }
    };

    // Subscribe before restoring so no auth change is missed
    let session_store = Arc::new(SessionStore::new(auth, profiles, config.auth.clone()));
    let listener_task = session_store.listen();
    session_store.initialize().await;

    let state = Arc::new(AppState {
        config: config.clone(),
        session_store: session_store.clone(),
        practice_log,
    });
    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session_store.teardown();
    if let Err(e) = listener_task.await {
        tracing::warn!("Auth change listener ended abnormally: {}", e);
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

//! HTTP facade tests driving the full router with a scripted auth service.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use serene_app::config::{LoggingConfig, ServerConfig, ServiceConfig, StorageConfig};
use serene_app::test_util::{auth_settings, identity, FakeAuthService};
use serene_app::{build_router, AppState, Config, SessionStore, SqliteStore};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    auth: Arc<FakeAuthService>,
    session_store: Arc<SessionStore>,
}

async fn test_app() -> TestApp {
    let config = Config {
        server: ServerConfig::default(),
        service: ServiceConfig {
            url: "http://127.0.0.1:9".to_string(),
            anon_key: "anon-key".to_string(),
        },
        auth: auth_settings(),
        storage: StorageConfig::default(),
        logging: LoggingConfig::default(),
    };

    let auth = Arc::new(FakeAuthService::new());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let session_store = Arc::new(SessionStore::new(auth.clone(), store.clone(), config.auth.clone()));
    session_store.initialize().await;

    let state = Arc::new(AppState {
        config,
        session_store: session_store.clone(),
        practice_log: store,
    });

    TestApp {
        router: build_router(state),
        auth,
        session_store,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Option<String>, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, location, bytes.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = test_app().await;
    let (status, _, body) = send(&app.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["signed_in"], false);
}

#[tokio::test]
async fn test_session_starts_signed_out() {
    let app = test_app().await;
    let (status, _, body) = send(&app.router, Method::GET, "/session", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert!(body["identity"].is_null());
    assert!(body["profile"].is_null());
    assert_eq!(body["loading"], false);
}

#[tokio::test]
async fn test_sign_in_with_unknown_username() {
    let app = test_app().await;
    let (status, _, body) = send(
        &app.router,
        Method::POST,
        "/auth/signin",
        Some(json!({ "username": "nobody", "password": "secret1" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["error"]["type"], "username_not_found");
    assert!(app.auth.calls().iter().all(|call| *call != "sign_in_with_password"));
}

#[tokio::test]
async fn test_sign_up_practice_and_stats() {
    let app = test_app().await;

    let (status, _, body) = send(
        &app.router,
        Method::POST,
        "/auth/signup",
        Some(json!({
            "email": "new@example.com",
            "password": "breathe-in",
            "confirm_password": "breathe-in",
            "username": "lotus"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let body = json_body(&body);
    assert_eq!(body["status"], "signed_in");
    assert_eq!(body["profile"]["username"], "lotus");

    let (status, _, _) = send(
        &app.router,
        Method::POST,
        "/practice",
        Some(json!({ "duration_minutes": 20 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = send(&app.router, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["total_minutes"], 20);
    assert_eq!(body["completed_count"], 1);
    assert_eq!(body["streak_days"], 1);
    assert_eq!(body["weekly"].as_array().unwrap().len(), 7);

    let (status, _, body) = send(&app.router, Method::GET, "/auth/username-available/lotus", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["available"], true);
}

#[tokio::test]
async fn test_sign_up_awaiting_confirmation() {
    let app = test_app().await;
    app.auth.require_confirmation(true);

    let (status, _, body) = send(
        &app.router,
        Method::POST,
        "/auth/signup",
        Some(json!({ "email": "new@example.com", "password": "breathe-in", "username": "lotus" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body = json_body(&body);
    assert_eq!(body["status"], "confirmation_required");
    assert_eq!(body["email"], "new@example.com");
}

#[tokio::test]
async fn test_practice_requires_session() {
    let app = test_app().await;

    let (status, _, body) = send(&app.router, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["error"]["type"], "not_signed_in");

    let (status, _, _) = send(
        &app.router,
        Method::POST,
        "/practice",
        Some(json!({ "duration_minutes": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_oauth_redirects_to_provider() {
    let app = test_app().await;
    let (status, location, _) = send(&app.router, Method::GET, "/auth/oauth/google", None).await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    assert!(location.unwrap().starts_with("https://auth.test/authorize?provider=google"));
}

#[tokio::test]
async fn test_callback_error_redirects_to_login() {
    let app = test_app().await;
    let (status, location, _) = send(
        &app.router,
        Method::GET,
        "/auth/callback?error=access_denied&error_description=Denied",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/login?error=Denied"));
    assert_eq!(
        app.session_store.state().last_error.map(|e| e.code()),
        Some("oauth_redirect")
    );
}

#[tokio::test]
async fn test_callback_without_query_serves_fragment_shim() {
    let app = test_app().await;
    let (status, _, body) = send(&app.router, Method::GET, "/auth/callback", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("location.hash"));
}

#[tokio::test]
async fn test_callback_completes_sign_in() {
    let app = test_app().await;
    app.auth.add_oauth_token("tok-7", identity("gh-7", "fern@users.example", "github"));

    let (status, location, _) = send(
        &app.router,
        Method::GET,
        "/auth/callback?access_token=tok-7&refresh_token=r-7&expires_in=3600",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/"));
    let state = app.session_store.state();
    assert_eq!(state.profile.unwrap().username, "fern");

    let (status, _, _) = send(&app.router, Method::POST, "/auth/signout", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.session_store.state().is_authenticated());
}

#[tokio::test]
async fn test_update_profile_route() {
    let app = test_app().await;
    app.auth.add_oauth_token("tok-7", identity("gh-7", "fern@users.example", "github"));
    send(&app.router, Method::GET, "/auth/callback?access_token=tok-7", None).await;

    let (status, _, body) = send(
        &app.router,
        Method::PATCH,
        "/profile",
        Some(json!({ "display_name": "Fern Green" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["display_name"], "Fern Green");
}

#[tokio::test]
async fn test_practice_duration_bounds() {
    let app = test_app().await;
    app.auth.add_oauth_token("tok-7", identity("gh-7", "fern@users.example", "github"));
    send(&app.router, Method::GET, "/auth/callback?access_token=tok-7", None).await;

    for minutes in [0u64, 24 * 60 + 1, u64::from(u32::MAX)] {
        let (status, _, body) = send(
            &app.router,
            Method::POST,
            "/practice",
            Some(json!({ "duration_minutes": minutes })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} minutes", minutes);
        assert_eq!(json_body(&body)["error"]["type"], "validation");
    }

    let (status, _, _) = send(
        &app.router,
        Method::POST,
        "/practice",
        Some(json!({ "duration_minutes": 24 * 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

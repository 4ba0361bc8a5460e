//! HTTP server for the dashboard page and JSON API.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::feed::ChangeFeed;
use crate::models::DashboardStats;
use crate::stats::StatsEngine;
use crate::store::Store;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::{Error, Result};

/// Activity rows returned when `limit` is omitted.
pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;

/// Upper bound on `limit` for `/api/activity`.
pub const MAX_ACTIVITY_LIMIT: usize = 100;

/// Error message for `POST /api/sync` without Notion credentials.
pub const SYNC_NOT_CONFIGURED: &str =
    "Notion is not configured (set NOTION_KEY and NOTION_DATABASE_ID)";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// `None` when Notion credentials are missing
    pub sync: Option<Arc<SyncEngine>>,
    pub stats: Arc<StatsEngine>,
    /// Live snapshot kept current by [`crate::stats::LiveStats`]
    pub live: watch::Receiver<DashboardStats>,
    pub feed: ChangeFeed,
    /// Page title shown in the browser
    pub title: String,
}

type ApiError = (StatusCode, Json<Value>);

fn internal_error(e: Error) -> ApiError {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

/// Build the router with every route and middleware layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(serve_index))
        .route("/api/config", get(get_config))
        .route("/api/sync", post(post_sync))
        .route("/api/stats", get(get_stats))
        .route("/api/tasks", get(get_tasks))
        .route("/api/sessions", get(get_sessions))
        .route("/api/activity", get(get_activity))
        .route("/ws", get(super::websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<()> {
    let host_addr: std::net::IpAddr = host
        .parse()
        .map_err(|e| Error::InvalidInput(format!("Invalid host address '{}': {}", host, e)))?;
    let addr = SocketAddr::from((host_addr, port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        backend = state.store.backend(),
        sync_enabled = state.sync.is_some(),
        "dashboard listening"
    );
    eprintln!("Serving deckhand dashboard at http://{}", addr);
    eprintln!("Press Ctrl+C to stop");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Serve the dashboard page
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("index.html"))
}

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "title": state.title,
        "backend": state.store.backend(),
        "sync_enabled": state.sync.is_some(),
    }))
}

/// Run one reconciliation pass.
async fn post_sync(State(state): State<AppState>) -> (StatusCode, Json<SyncOutcome>) {
    let Some(engine) = state.sync.as_ref() else {
        tracing::error!("sync requested but Notion is not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SyncOutcome::Failure {
                success: false,
                error: SYNC_NOT_CONFIGURED.to_string(),
            }),
        );
    };

    let outcome = SyncOutcome::from(&engine.sync().await);
    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome))
}

/// Freshly computed stats, independent of the live snapshot.
async fn get_stats(State(state): State<AppState>) -> Json<DashboardStats> {
    Json(state.stats.compute_stats().await)
}

async fn get_tasks(State(state): State<AppState>) -> std::result::Result<Json<Value>, ApiError> {
    let tasks = state.store.list_tasks().await.map_err(internal_error)?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn get_sessions(
    State(state): State<AppState>,
) -> std::result::Result<Json<Value>, ApiError> {
    let sessions = state.store.list_sessions().await.map_err(internal_error)?;
    Ok(Json(json!({ "sessions": sessions })))
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<usize>,
}

/// Most recent activity first (limited to reduce bandwidth)
async fn get_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> std::result::Result<Json<Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .min(MAX_ACTIVITY_LIMIT);
    let activity = state
        .store
        .list_activity(limit)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "activity": activity })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewActivity;
    use crate::notion::FetchError;
    use crate::test_utils::{FakeSource, TestEnv, external};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state_for(store: Arc<dyn Store>, source: Option<Arc<FakeSource>>) -> AppState {
        let (_tx, live) = watch::channel(DashboardStats::empty());
        AppState {
            store: Arc::clone(&store),
            sync: source.map(|s| Arc::new(SyncEngine::new(s, Arc::clone(&store)))),
            stats: Arc::new(StatsEngine::new(store)),
            live,
            feed: ChangeFeed::new(),
            title: "test".to_string(),
        }
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_sync_then_tasks_and_stats() {
        let env = TestEnv::new();
        let store: Arc<dyn Store> = Arc::new(env.open_store());
        let source = Arc::new(FakeSource::new(vec![external(
            "a",
            Some("Write spec"),
            Some("In Progress"),
            None,
        )]));
        let app = router(state_for(store, Some(source)));

        let (status, body) = call(app.clone(), "POST", "/api/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "count": 1}));

        let (status, body) = call(app.clone(), "GET", "/api/tasks").await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["notion_id"], "a");
        assert_eq!(tasks[0]["title"], "Write spec");
        assert_eq!(tasks[0]["status"], "in-progress");
        assert_eq!(tasks[0]["priority"], "P3");

        let (_, stats) = call(app, "GET", "/api/stats").await;
        assert_eq!(stats["pendingTasks"]["value"], 0);
        assert_eq!(stats["completedTasks"]["value"], 0);
    }

    #[tokio::test]
    async fn test_sync_failure_is_500_with_error() {
        let env = TestEnv::new();
        let store: Arc<dyn Store> = Arc::new(env.open_store());
        let source = Arc::new(FakeSource::default());
        source.fail_with(FetchError::Unauthorized(401));
        let app = router(state_for(store, Some(source)));

        let (status, body) = call(app, "POST", "/api/sync").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("HTTP 401"));
    }

    #[tokio::test]
    async fn test_sync_without_notion_is_500() {
        let env = TestEnv::new();
        let store: Arc<dyn Store> = Arc::new(env.open_store());
        let app = router(state_for(store, None));

        let (status, body) = call(app.clone(), "POST", "/api/sync").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], SYNC_NOT_CONFIGURED);

        let (_, config) = call(app, "GET", "/api/config").await;
        assert_eq!(config["sync_enabled"], false);
        assert_eq!(config["backend"], "sqlite");
    }

    #[tokio::test]
    async fn test_activity_limit_is_capped() {
        let env = TestEnv::new();
        let store: Arc<dyn Store> = Arc::new(env.open_store());
        for i in 0..105 {
            store
                .append_activity(&NewActivity {
                    actor: None,
                    action: format!("step.{}", i),
                    details: Value::Null,
                })
                .await
                .unwrap();
        }
        let app = router(state_for(store, None));

        let (_, body) = call(app.clone(), "GET", "/api/activity").await;
        assert_eq!(body["activity"].as_array().unwrap().len(), DEFAULT_ACTIVITY_LIMIT);

        let (_, body) = call(app.clone(), "GET", "/api/activity?limit=500").await;
        assert_eq!(body["activity"].as_array().unwrap().len(), MAX_ACTIVITY_LIMIT);

        let (_, body) = call(app, "GET", "/api/activity?limit=3").await;
        let activity = body["activity"].as_array().unwrap();
        assert_eq!(activity.len(), 3);
        assert_eq!(activity[0]["action"], "step.104");
    }

    #[tokio::test]
    async fn test_sessions_empty() {
        let env = TestEnv::new();
        let store: Arc<dyn Store> = Arc::new(env.open_store());
        let (status, body) = call(router(state_for(store, None)), "GET", "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"sessions": []}));
    }
}

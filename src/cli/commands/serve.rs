//! HTTP API server.
//!
//! `GET` reads the state of a transcript or summary, `POST` creates it.
//! Expected states (including "not found" and "in progress") are 200
//! responses; only unexpected failures are 500.

use super::worker::{log_queue_counts, Background};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::TldwError;
use crate::orchestrator::Orchestrator;
use crate::resources::{ResourceKind, StatusView};
use crate::store;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

/// Shared application state.
struct AppState {
    orchestrator: Orchestrator,
    poll_interval_ms: u64,
}

/// Run the HTTP API server, with worker pools unless `no_workers`.
pub async fn run_serve(
    host: Option<&str>,
    port: Option<u16>,
    no_workers: bool,
    settings: Settings,
) -> anyhow::Result<()> {
    let kv = store::connect(&settings).await?;
    let orchestrator = Orchestrator::with_store(&settings, kv.clone())?;

    let background = if no_workers {
        None
    } else {
        log_queue_counts(&orchestrator).await;
        Some(Background::start(&orchestrator, kv, &settings))
    };
    let state = Arc::new(AppState {
        orchestrator,
        poll_interval_ms: settings.server.poll_interval_ms,
    });

    let host = host.unwrap_or(&settings.server.host);
    let port = port.unwrap_or(settings.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("tldw API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    if no_workers {
        Output::warning("Workers disabled; jobs wait for a separate `tldw worker`.");
    }
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Status", "GET  /{kind}/{video_id}/{language}");
    Output::kv("Create", "POST /{kind}/{video_id}/{language}");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    if let Some(background) = background {
        Output::info("Waiting for running jobs...");
        background.stop().await;
    }

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/{kind}/{video_id}/{language}",
            get(get_resource).post(create_resource),
        )
        .layer(cors)
        .with_state(state)
}

// === Response Types ===

#[derive(Serialize)]
struct ResourceResponse {
    #[serde(flatten)]
    view: StatusView,
    /// Suggested delay before the next poll, while the resource is unfinished.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl ResourceResponse {
    fn new(view: StatusView, poll_interval_ms: u64) -> Self {
        let retry_after_ms = (!view.status.is_terminal()).then_some(poll_interval_ms);
        Self { view, retry_after_ms }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Failures the API reports to clients.
enum ApiError {
    BadRequest(String),
    Internal,
}

impl From<TldwError> for ApiError {
    fn from(e: TldwError) -> Self {
        match e {
            TldwError::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => {
                error!("Request failed: {}", other);
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

fn parse_kind(kind: &str) -> Result<ResourceKind, ApiError> {
    match kind.parse::<ResourceKind>() {
        Ok(ResourceKind::Translation) | Err(_) => Err(ApiError::BadRequest(format!(
            "Unknown resource kind '{}'",
            kind
        ))),
        Ok(kind) => Ok(kind),
    }
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path((kind, video_id, language)): Path<(String, String, String)>,
) -> Result<Json<ResourceResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let view = state.orchestrator.status(kind, &video_id, &language).await?;
    Ok(Json(ResourceResponse::new(view, state.poll_interval_ms)))
}

async fn create_resource(
    State(state): State<Arc<AppState>>,
    Path((kind, video_id, language)): Path<(String, String, String)>,
) -> Result<Json<ResourceResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let view = state.orchestrator.request(kind, &video_id, &language).await?;
    Ok(Json(ResourceResponse::new(view, state.poll_interval_ms)))
}

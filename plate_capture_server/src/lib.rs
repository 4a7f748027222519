//! HTTP front for the plate capture pipeline.

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use plate_capture::{DetectionRun, PlatePipeline, RunError};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::error;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pipeline: Arc<PlatePipeline>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("detection worker failed: {0}")]
    Worker(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Run(RunError::Busy) => (
                StatusCode::TOO_MANY_REQUESTS,
                "Detection already in progress. Please wait.".to_string(),
            ),
            ApiError::Run(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Could not start detection: {e}"),
            ),
            ApiError::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /start_detection: one capture, detect and OCR pass.
async fn start_detection(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DetectionRun>, ApiError> {
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.run())
        .await
        .map_err(|e| {
            error!(error = %e, "spawn_blocking failed");
            ApiError::Worker(e.to_string())
        })?;
    Ok(Json(outcome?))
}

/// GET /metrics in Prometheus text format.
async fn metrics() -> Response {
    match plate_capture::metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// `static_dir` holds `index.html`; saved plates are served from the
/// pipeline's output directory under `/plates/`.
pub fn router(pipeline: Arc<PlatePipeline>, static_dir: &Path) -> Router {
    let plates = ServeDir::new(pipeline.writer().dir());
    let state = Arc::new(AppState { pipeline });

    Router::new()
        .route("/start_detection", post(start_detection))
        .route("/metrics", get(metrics))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/plates", plates)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

//! HTTP server.
//!
//! Exposes the answer pipeline and the media and suggestion helpers as a
//! JSON HTTP API. Answers stream as Server-Sent Events: the SSE event name
//! is the pipeline event type (`sources`, `response`, `end`, `error`) and
//! the data is the event's JSON form. Closing the connection cancels the
//! request.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/focus-modes` | List focus modes |
//! | `POST` | `/api/search` | Answer a query; SSE stream |
//! | `POST` | `/api/images` | Image search |
//! | `POST` | `/api/videos` | Video search |
//! | `POST` | `/api/suggestions` | Follow-up suggestions |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "unknown focus mode: poetry" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `upstream_unavailable` (502), `timeout` (504), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::focus::FocusRegistry;
use crate::media::MediaSearch;
use crate::models::{ChatMessage, ImageResult, PipelineRequest, VideoResult};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::services::Services;
use crate::suggestions::SuggestionGenerator;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    services: Services,
    modes: Arc<FocusRegistry>,
    settings: PipelineSettings,
}

/// Starts the HTTP server with the configured adapters.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    run_server_with_services(config, services).await
}

/// Starts the HTTP server with caller-supplied capabilities.
pub async fn run_server_with_services(config: &Config, services: Services) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(config, services);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Focus server listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the application router.
pub fn router(config: &Config, services: Services) -> Router {
    let state = AppState {
        services,
        modes: Arc::new(FocusRegistry::from_config(config)),
        settings: PipelineSettings::from_config(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/focus-modes", get(handle_focus_modes))
        .route("/api/search", post(handle_search))
        .route("/api/images", post(handle_images))
        .route("/api/videos", post(handle_videos))
        .route("/api/suggestions", post(handle_suggestions))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Maps capability failures onto gateway statuses.
///
/// The cause is logged; clients only see a fixed message for the code.
impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (status, code, message) = match err.code() {
            "timeout" => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                "an upstream service timed out",
            ),
            "upstream_unavailable" => (
                StatusCode::BAD_GATEWAY,
                "upstream_unavailable",
                "an upstream service is unavailable",
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal error",
            ),
        };
        warn!(code, "request failed: {}", err);
        AppError {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/focus-modes ============

#[derive(Serialize)]
struct FocusModeInfo {
    name: String,
    description: String,
    retrieval: bool,
    reranks: bool,
}

#[derive(Serialize)]
struct FocusModeListResponse {
    modes: Vec<FocusModeInfo>,
}

async fn handle_focus_modes(State(state): State<AppState>) -> Json<FocusModeListResponse> {
    let modes = state
        .modes
        .modes()
        .iter()
        .map(|m| FocusModeInfo {
            name: m.name.clone(),
            description: m.description.clone(),
            retrieval: m.has_retrieval(),
            reranks: m.reranks(),
        })
        .collect();
    Json(FocusModeListResponse { modes })
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchRequest {
    focus_mode: String,
    query: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

type EventStream = BoxStream<'static, Result<Event, axum::Error>>;

/// Handler for `POST /api/search`.
///
/// Returns `404` for an unknown focus mode and `400` for an empty query.
/// Failures after the stream opens arrive as an `error` event.
async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Sse<KeepAliveStream<EventStream>>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let mode = state
        .modes
        .find(&req.focus_mode)
        .ok_or_else(|| not_found(format!("unknown focus mode: {}", req.focus_mode)))?;

    let pipeline = Pipeline::new(state.services.clone(), mode, state.settings.clone());
    let rx = pipeline.spawn(PipelineRequest::new(req.query, req.history));

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((event, rx))
    })
    .map(|event| Event::default().event(event.kind()).json_data(&event));

    Ok(Sse::new(events.boxed()).keep_alive(KeepAlive::default()))
}

// ============ POST /api/images, /api/videos ============

#[derive(Deserialize)]
struct MediaRequest {
    query: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ImagesResponse {
    images: Vec<ImageResult>,
}

#[derive(Serialize)]
struct VideosResponse {
    videos: Vec<VideoResult>,
}

async fn handle_images(
    State(state): State<AppState>,
    Json(req): Json<MediaRequest>,
) -> Result<Json<ImagesResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let media = MediaSearch::new(state.services.clone(), state.settings.clone());
    let images = media.images(&req.query, &req.history).await?;
    Ok(Json(ImagesResponse { images }))
}

async fn handle_videos(
    State(state): State<AppState>,
    Json(req): Json<MediaRequest>,
) -> Result<Json<VideosResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let media = MediaSearch::new(state.services.clone(), state.settings.clone());
    let videos = media.videos(&req.query, &req.history).await?;
    Ok(Json(VideosResponse { videos }))
}

// ============ POST /api/suggestions ============

#[derive(Deserialize)]
struct SuggestionsRequest {
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct SuggestionsResponse {
    suggestions: Vec<String>,
}

async fn handle_suggestions(
    State(state): State<AppState>,
    Json(req): Json<SuggestionsRequest>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    let suggestions = SuggestionGenerator::new(state.settings.model_timeout)
        .generate(state.services.llm.as_ref(), &req.history)
        .await?;
    Ok(Json(SuggestionsResponse { suggestions }))
}

//! HTTP API server.
//!
//! Exposes ingestion, chat and podcast generation as a JSON API under
//! `/api`, plus `GET /` (service info) and `GET /health`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Ingest a file (multipart `file`, optional `session_id`) |
//! | `POST` | `/api/scrape` | Ingest web pages `{urls}` |
//! | `POST` | `/api/youtube` | Ingest a YouTube video `{url}` |
//! | `POST` | `/api/text` | Ingest pasted text `{content}` |
//! | `GET`  | `/api/sources` | List a session's sources |
//! | `DELETE` | `/api/sources/{name}` | Remove a source and its vectors |
//! | `POST` | `/api/chat` | Answer `{query, session_id}` with citations |
//! | `POST` | `/api/chat/reset` | Clear memory, get a new session id |
//! | `POST` | `/api/podcast/generate` | Write (and voice) a podcast script |
//! | `GET`  | `/api/podcast/audio/{session_id}` | Download the last podcast audio |
//!
//! Except for upload and chat, `session_id` travels as a query parameter.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Session not found" } }
//! ```
//!
//! Codes: `bad_request` and `feature_disabled` (400), `not_found` (404),
//! `timeout` (504), `upstream_error` and `internal` (500). 500 responses
//! carry an opaque message and a `correlation_id`; the cause is logged.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::chat;
use crate::config::{Config, Credentials};
use crate::error::KcError;
use crate::ingest::{self, Upload};
use crate::models::{RagAnswer, SourceManifestEntry};
use crate::services::Services;
use crate::sessions::SessionManager;
use crate::studio::{self, GeneratedPodcast, PodcastRequest};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<SessionManager>,
}

/// Starts the server with the providers the environment's credentials
/// allow. This is the entry point used by `kcast serve`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let credentials = Credentials::from_env();
    let services = Services::from_config(config.clone(), &credentials)?;
    run_server_with_services(Arc::new(services)).await
}

/// Starts the server over prebuilt [`Services`]. Runs until the process is
/// terminated.
pub async fn run_server_with_services(services: Arc<Services>) -> anyhow::Result<()> {
    let config = services.config.clone();
    services.log_capabilities();

    let manager = Arc::new(SessionManager::new(services));
    let _sweeper = manager.spawn_sweeper(
        Duration::from_secs(config.sessions.cleanup_interval_secs),
        Duration::from_secs(config.sessions.max_age_hours * 3600),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "KnowledgeCast API listening");
    axum::serve(listener, router(manager)).await?;
    Ok(())
}

/// Builds the full router over an existing session manager.
pub fn router(manager: Arc<SessionManager>) -> Router {
    let config = manager.services().config.clone();
    let state = AppState { manager };

    let api = Router::new()
        .route("/upload", post(handle_upload))
        .route("/scrape", post(handle_scrape))
        .route("/youtube", post(handle_youtube))
        .route("/text", post(handle_text))
        .route("/sources", get(handle_list_sources))
        .route("/sources/{*name}", delete(handle_delete_source))
        .route("/chat", post(handle_chat))
        .route("/chat/reset", post(handle_chat_reset))
        .route("/podcast/generate", post(handle_generate_podcast))
        .route("/podcast/audio/{session_id}", get(handle_podcast_audio));

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .nest("/api", api)
        // Multipart framing needs headroom over the raw file limit.
        .layer(DefaultBodyLimit::max(config.ingest.max_upload_bytes + 64 * 1024))
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

/// Converts into a JSON error response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    correlation_id: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            correlation_id: None,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<KcError> for AppError {
    fn from(err: KcError) -> Self {
        match &err {
            KcError::BadRequest(_) => bad_request(err.to_string()),
            KcError::FeatureDisabled(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "feature_disabled", err.to_string())
            }
            KcError::SessionNotFound | KcError::SourceNotFound(_) | KcError::NotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            KcError::Timeout(_) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string())
            }
            KcError::Upstream { service, .. } => {
                let correlation_id = Uuid::new_v4().to_string();
                tracing::error!(%correlation_id, service, error = %err, "upstream failure");
                AppError {
                    correlation_id: Some(correlation_id),
                    ..AppError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "upstream_error",
                        format!("{} is unavailable, please try again", service),
                    )
                }
            }
            KcError::Internal(_) => {
                let correlation_id = Uuid::new_v4().to_string();
                tracing::error!(%correlation_id, error = %format!("{:#}", err), "internal error");
                AppError {
                    correlation_id: Some(correlation_id),
                    ..AppError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal",
                        "Internal server error",
                    )
                }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                correlation_id: self.correlation_id,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Unwraps a JSON body, turning malformed input into a 400.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

// ============ Request / response bodies ============

#[derive(Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

impl SessionQuery {
    fn optional(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn required(&self) -> Result<&str, AppError> {
        self.session_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| bad_request("session_id is required"))
    }
}

#[derive(Deserialize)]
struct UrlRequest {
    urls: Vec<String>,
}

#[derive(Deserialize)]
struct YouTubeRequest {
    url: String,
}

#[derive(Deserialize)]
struct TextRequest {
    content: String,
}

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    session_id: String,
}

#[derive(Deserialize)]
struct ChatResetRequest {
    session_id: String,
}

#[derive(Serialize)]
struct SourceResponse {
    success: bool,
    session_id: String,
    source: SourceManifestEntry,
}

#[derive(Serialize)]
struct SourcesResponse {
    success: bool,
    session_id: String,
    sources: Vec<SourceManifestEntry>,
}

#[derive(Serialize)]
struct SourceListResponse {
    sources: Vec<SourceManifestEntry>,
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ResetResponse {
    success: bool,
    new_session_id: String,
}

// ============ GET / and GET /health ============

async fn handle_root(State(state): State<AppState>) -> Json<serde_json::Value> {
    let caps = state.manager.services().capabilities();
    Json(serde_json::json!({
        "name": "KnowledgeCast API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "healthy",
        "features": {
            "audio_processing": caps.audio,
            "web_scraping": caps.scraping,
            "generation": caps.generation,
            "memory": caps.memory,
        }
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============ Ingestion ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SourceResponse>, AppError> {
    let mut upload = None;
    let mut session_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(e.body_text()))?;
                upload = Some(Upload {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("session_id") => {
                session_id = Some(field.text().await.map_err(|e| bad_request(e.body_text()))?);
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| bad_request("file is required"))?;
    let ingested = ingest::ingest_upload(&state.manager, session_id.as_deref(), upload).await?;
    Ok(Json(SourceResponse {
        success: true,
        session_id: ingested.session_id,
        source: ingested.source,
    }))
}

async fn handle_scrape(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<Json<SourcesResponse>, AppError> {
    let body = json_body(payload)?;
    let batch = ingest::ingest_urls(&state.manager, query.optional(), &body.urls).await?;
    Ok(Json(SourcesResponse {
        success: true,
        session_id: batch.session_id,
        sources: batch.sources,
    }))
}

async fn handle_youtube(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    payload: Result<Json<YouTubeRequest>, JsonRejection>,
) -> Result<Json<SourceResponse>, AppError> {
    let body = json_body(payload)?;
    let ingested = ingest::ingest_youtube(&state.manager, query.optional(), &body.url).await?;
    Ok(Json(SourceResponse {
        success: true,
        session_id: ingested.session_id,
        source: ingested.source,
    }))
}

async fn handle_text(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<SourceResponse>, AppError> {
    let body = json_body(payload)?;
    let ingested = ingest::ingest_text(&state.manager, query.optional(), &body.content).await?;
    Ok(Json(SourceResponse {
        success: true,
        session_id: ingested.session_id,
        source: ingested.source,
    }))
}

async fn handle_list_sources(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SourceListResponse>, AppError> {
    let sources = ingest::list_sources(&state.manager, query.required()?)?;
    Ok(Json(SourceListResponse { sources }))
}

async fn handle_delete_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<MessageResponse>, AppError> {
    ingest::delete_source(&state.manager, query.required()?, &name).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Source removed".to_string(),
    }))
}

// ============ Chat ============

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<RagAnswer>, AppError> {
    let body = json_body(payload)?;
    let answer = chat::chat(&state.manager, &body.session_id, &body.query).await?;
    Ok(Json(answer))
}

async fn handle_chat_reset(
    State(state): State<AppState>,
    payload: Result<Json<ChatResetRequest>, JsonRejection>,
) -> Result<Json<ResetResponse>, AppError> {
    let body = json_body(payload)?;
    let new_session_id = chat::reset_chat(&state.manager, &body.session_id).await?;
    Ok(Json(ResetResponse {
        success: true,
        new_session_id,
    }))
}

// ============ Podcast ============

async fn handle_generate_podcast(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    payload: Result<Json<PodcastRequest>, JsonRejection>,
) -> Result<Json<GeneratedPodcast>, AppError> {
    let body = json_body(payload)?;
    let podcast = studio::generate_podcast(&state.manager, query.optional(), &body).await?;
    Ok(Json(podcast))
}

async fn handle_podcast_audio(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let path = studio::podcast_audio(&state.manager, &session_id).await?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| KcError::Internal(anyhow::Error::new(e)))?;

    let filename = format!("podcast_{}.wav", chrono::Utc::now().timestamp());
    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

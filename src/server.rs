//! HTTP front end.
//!
//! A thin axum layer over the ingestion and query pipelines.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health`     | Health check (returns version) |
//! | `GET`    | `/api/stats`  | Document and chunk counts |
//! | `POST`   | `/api/ingest` | Ingest a file under `[server].ingest_root`: `{"path": "...", "filename": "..."}` |
//! | `DELETE` | `/api/reset`  | Clear the knowledge base |
//! | `POST`   | `/api/query`  | `{"query": "...", "messages": [...]}`, streams NDJSON events |
//!
//! # Error Contract
//!
//! Non-streaming errors use one shape:
//!
//! ```json
//! { "error": { "code": "unsupported_format", "message": "unsupported file type: .png" } }
//! ```
//!
//! Failures after a query stream has started arrive in-band as the
//! terminal `{"error": "..."}` event instead.
//!
//! # Ingest root
//!
//! `/api/ingest` never opens a path outside `[server].ingest_root`. The
//! requested path is canonicalized (following symlinks and `..`) and must
//! land inside the canonical root, otherwise the request fails with `403`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! served from elsewhere can call the API. The ingest root is what keeps a
//! cross-origin caller from reading arbitrary server files.

use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::IngestError;
use crate::ingest::IngestReport;
use crate::pipeline::QueryRequest;
use crate::services::Services;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.server.ingest_root)?;
    let services = Arc::new(Services::from_config(config).await?);
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        ingest_root = %config.server.ingest_root.display(),
        "listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

/// The application router, without a listener.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/stats", get(handle_stats))
        .route("/api/ingest", post(handle_ingest))
        .route("/api/reset", delete(handle_reset))
        .route("/api/query", post(handle_query))
        .layer(cors)
        .with_state(AppState { services })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let (status, code) = match &err {
            IngestError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            IngestError::NoExtractableText(_) => (StatusCode::BAD_REQUEST, "no_extractable_text"),
            IngestError::ExtractionFailure { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failure")
            }
            IngestError::InvalidChunkParams { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_config")
            }
            IngestError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_failure"),
            IngestError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_failure"),
        };
        AppError::new(status, code, err.to_string())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/stats ============

#[derive(Serialize)]
struct StatsResponse {
    documents: usize,
    chunks: usize,
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let stats = state
        .services
        .stats()
        .await
        .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "index_failure", e.to_string()))?;
    Ok(Json(StatsResponse {
        documents: stats.documents,
        chunks: stats.chunks,
    }))
}

// ============ POST /api/ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    path: PathBuf,
    /// Name used for format detection and citations; defaults to the
    /// file name of `path`.
    #[serde(default)]
    filename: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let path = resolve_ingest_path(&state.services.config.server.ingest_root, &req.path)?;
    let filename = match req.filename {
        Some(name) if !name.trim().is_empty() => name,
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let report = state
        .services
        .ingestion
        .ingest_document(&path, &filename)
        .await?;
    Ok(Json(report))
}

/// Canonical path of an existing file inside `root`.
fn resolve_ingest_path(root: &Path, requested: &Path) -> Result<PathBuf, AppError> {
    let root = root.canonicalize().map_err(|e| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "invalid_config",
            format!("ingest root {} is unavailable: {}", root.display(), e),
        )
    })?;
    let forbidden = || {
        AppError::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!("{} is outside the ingest root", requested.display()),
        )
    };
    let not_found = || {
        AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no such file: {}", requested.display()),
        )
    };

    // An absolute `requested` replaces the root entirely.
    let joined = root.join(requested);
    let resolved = match joined.canonicalize() {
        Ok(path) => path,
        Err(_)
            if !joined.starts_with(&root)
                || joined.components().any(|c| matches!(c, Component::ParentDir)) =>
        {
            return Err(forbidden())
        }
        Err(_) => return Err(not_found()),
    };
    if !resolved.starts_with(&root) {
        return Err(forbidden());
    }
    if !resolved.is_file() {
        return Err(not_found());
    }
    Ok(resolved)
}

// ============ DELETE /api/reset ============

async fn handle_reset(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.services.ingestion.reset_knowledge_base().await?;
    Ok(Json(serde_json::json!({ "status": "reset" })))
}

// ============ POST /api/query ============

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Response, AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "query must not be empty",
        ));
    }

    // Dropping the body (client gone) drops the receiver, which stops the run.
    let events = state
        .services
        .query
        .run(req)
        .map(|event| Ok::<_, Infallible>(event.to_ndjson_line()));

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(events),
    )
        .into_response())
}

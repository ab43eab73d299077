//! HTTP front end for the job service.
//!
//! | Route                     | Result                                         |
//! |---------------------------|------------------------------------------------|
//! | `POST /start`             | `202 {"task_id"}` or `400 {"error"}`           |
//! | `GET /status/{task_id}`   | `200` job record, `404` unknown, `400` bad id  |
//! | `GET /download/{file}`    | the merged PDF as an attachment, or `404`      |
//! | `GET /health`             | `200 {"status":"ok"}`                          |
//!
//! `/start` takes a multipart form: a `file` upload (`.zpl`, `.txt` or `.zip`)
//! wins over a `zpl_code` text field when both are present.

use crate::config::ServerSettings;
use crate::error::ZplError;
use crate::job::JobId;
use crate::pipeline::input::Submission;
use crate::service::JobService;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Largest accepted request body (ZIP uploads included).
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// How often the retention sweeper runs, relative to the retention period.
const SWEEPS_PER_RETENTION: u32 = 4;

#[derive(Serialize)]
pub struct StartResponse {
    pub task_id: JobId,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Build the router over a shared service.
pub fn create_router(service: Arc<JobService>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health_handler))
        .route("/start", post(start_handler))
        .route("/status/{task_id}", get(status_handler))
        .route("/download/{filename}", get(download_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(trace_layer)
        .with_state(service)
}

/// Bind, start the optional retention sweeper, and serve until shutdown.
pub async fn serve(service: Arc<JobService>, settings: &ServerSettings) -> std::io::Result<()> {
    if let Some(retention) = settings.retention {
        spawn_sweeper(Arc::clone(&service), retention);
    }

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

fn spawn_sweeper(service: Arc<JobService>, retention: Duration) {
    let period = (retention / SWEEPS_PER_RETENTION).max(Duration::from_secs(1));
    tracing::info!(
        "Retention: {}s (sweeping every {}s)",
        retention.as_secs(),
        period.as_secs()
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep(retention).await {
                tracing::warn!(error = %e, "Retention sweep failed");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tracing::instrument(skip(service, multipart))]
pub async fn start_handler(
    State(service): State<Arc<JobService>>,
    mut multipart: Multipart,
) -> Response {
    let submission = match read_form(&mut multipart).await {
        Ok(Some(submission)) => submission,
        Ok(None) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ZplError::EmptySubmission.to_string(),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read multipart");
            return error_response(
                e.status(),
                format!("Failed to read form data: {}", e.body_text()),
            );
        }
    };

    match service.submit(submission).await {
        Ok(task_id) => {
            tracing::info!(%task_id, "Batch accepted");
            (StatusCode::ACCEPTED, Json(StartResponse { task_id })).into_response()
        }
        Err(e) if e.is_input_error() => {
            tracing::debug!(error = %e, "Submission rejected");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to start batch");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Pull a submission out of the form. A non-empty `file` upload wins over
/// `zpl_code`.
async fn read_form(
    multipart: &mut Multipart,
) -> Result<Option<Submission>, axum::extract::multipart::MultipartError> {
    let mut pasted: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(|name| name.trim().to_string())
                    .unwrap_or_default();
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was chosen.
                if !filename.is_empty() || !bytes.is_empty() {
                    return Ok(Some(Submission::File {
                        filename,
                        bytes: bytes.to_vec(),
                    }));
                }
            }
            Some("zpl_code") => {
                let text = field.text().await?;
                if !text.is_empty() {
                    pasted = Some(text);
                }
            }
            _ => continue,
        }
    }

    Ok(pasted.map(Submission::Text))
}

#[tracing::instrument(skip(service))]
pub async fn status_handler(
    State(service): State<Arc<JobService>>,
    Path(task_id): Path<String>,
) -> Response {
    let id: JobId = match task_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid task ID: {}", task_id),
            )
        }
    };

    match service.status(id) {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Task not found: {}", task_id),
        ),
    }
}

#[tracing::instrument(skip(service))]
pub async fn download_handler(
    State(service): State<Arc<JobService>>,
    Path(filename): Path<String>,
) -> Response {
    let bytes = match service.open_artifact(&filename).await {
        Ok(bytes) => bytes,
        Err(e @ ZplError::ArtifactNotFound { .. }) => {
            return error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read artifact");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    // Stored names are sanitized at write time.
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

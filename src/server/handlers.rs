use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode},
    middleware::Next,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument};

use super::models::{ApiError, HealthResponse};
use super::state::ServerState;
use crate::{is_supported_file_name, AnalyzeError, DocumentReport, HandwritingAnalyzer};

const IMAGE_FIELD: &str = "image";

pub fn router(state: Arc<ServerState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/analyze_handwriting", post(analyze_handwriting))
        .route("/health_handwriting", get(health_handwriting))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(axum::middleware::from_fn(cors_middleware))
}

pub async fn run_server(
    analyzer: HandwritingAnalyzer,
    addr: &str,
    max_upload_bytes: usize,
) -> Result<()> {
    let state = Arc::new(ServerState { analyzer });
    let app = router(state, max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind server address {addr}"))?;
    info!("Listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
}

#[instrument(skip_all)]
async fn analyze_handwriting(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<Json<DocumentReport>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if !is_supported_file_name(&file_name) {
            return Err(AnalyzeError::UnsupportedFileType.into());
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::new(err.status(), err.body_text()))?;
        upload = Some((file_name, bytes));
        break;
    }
    let (file_name, bytes) = upload.ok_or_else(|| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("missing multipart field `{IMAGE_FIELD}`"),
        )
    })?;
    info!("Received {file_name} ({} bytes)", bytes.len());

    let task_name = file_name.clone();
    let size = bytes.len();
    let report = tokio::task::spawn_blocking(move || {
        state.analyzer.analyze_upload(&task_name, &bytes)
    })
    .await
    .map_err(|err| {
        // pipeline panics are caught by the analyzer, so no image was decoded here
        error!(
            "Handwriting analysis of {file_name} ({size} bytes) aborted, shape: unknown, detection method: none: {err}"
        );
        AnalyzeError::Internal(format!("analysis task failed: {err}"))
    })??;
    Ok(Json(report))
}

async fn health_handwriting(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let tesseract_status = match state.analyzer.ocr_engine().cloned() {
        Some(engine) => match tokio::task::spawn_blocking(move || engine.probe()).await {
            Ok(Ok(_)) => "healthy",
            _ => "unavailable",
        },
        None => "unavailable",
    };
    Json(HealthResponse {
        status: "healthy",
        tesseract_status,
        analyzer_version: env!("CARGO_PKG_VERSION"),
    })
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::AnalyzeError;

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) detail: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) tesseract_status: &'static str,
    pub(crate) analyzer_version: &'static str,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) detail: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<AnalyzeError> for ApiError {
    fn from(err: AnalyzeError) -> Self {
        if err.is_input_error() {
            Self::new(StatusCode::BAD_REQUEST, err.to_string())
        } else {
            Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Server error: {err}"),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

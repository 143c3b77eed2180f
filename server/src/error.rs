//! Control-API error taxonomy: maps `CoreError` (and request-validation
//! failures the core never sees) onto HTTP status codes (spec §6, §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use vibetunnel_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Core(CoreError::IdCollision(_)) => StatusCode::CONFLICT,
            ApiError::Core(CoreError::AlreadyExited) => StatusCode::GONE,
            ApiError::Core(CoreError::WorkingDirMissing(_))
            | ApiError::Core(CoreError::InvalidCommand)
            | ApiError::Core(CoreError::InvalidDimensions) => StatusCode::BAD_REQUEST,
            ApiError::Core(CoreError::ResourceExhausted(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Core(CoreError::ExecFailed(_)) | ApiError::Core(CoreError::Io(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

//! Maps core errors onto HTTP responses: `{"error": <kind>, "message": <text>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use vera_core::{UpstreamKind, VeraError};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub VeraError);

impl From<VeraError> for ApiError {
    fn from(err: VeraError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &VeraError) -> StatusCode {
    match err {
        VeraError::NotFound(_) => StatusCode::NOT_FOUND,
        VeraError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        VeraError::Forbidden(_) => StatusCode::FORBIDDEN,
        VeraError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VeraError::Conflict(_) => StatusCode::CONFLICT,
        VeraError::Upstream {
            kind: UpstreamKind::Timeout,
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        VeraError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        VeraError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(target: "vera::http", status = status.as_u16(), error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.message(),
        }));
        (status, body).into_response()
    }
}

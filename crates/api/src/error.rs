//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lifecycle::LifecycleError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// The caller did not identify itself.
    Unauthorized(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Failure reported by the order lifecycle.
    Lifecycle(LifecycleError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Lifecycle(err) => lifecycle_error_to_response(err),
        };
        metrics::counter!("http_errors_total", "status" => status.as_u16().to_string())
            .increment(1);

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn lifecycle_error_to_response(err: LifecycleError) -> (StatusCode, String) {
    let status = match &err {
        LifecycleError::Conflict
        | LifecycleError::PreconditionFailed { .. }
        | LifecycleError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LifecycleError::InsufficientStock { .. }
        | LifecycleError::EmptyCart
        | LifecycleError::AddressNotFound
        | LifecycleError::ProductNotFound(_)
        | LifecycleError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
        LifecycleError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::TransientInfra(_) | LifecycleError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        ApiError::Lifecycle(err)
    }
}

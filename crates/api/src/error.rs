//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga creation or execution error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::AlreadyRunning(_) | SagaError::InvalidState { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        SagaError::UnknownService { .. } | SagaError::EmptySaga | SagaError::DuplicateStepId(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        SagaError::InvalidTransition { .. }
        | SagaError::InvalidStepTransition { .. }
        | SagaError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Validation error")]
    ValidationError(Value),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Upstream timeout: {0}")]
    Timeout(String),

    /// An operation committed some of its steps; the body tells the caller how to resume.
    #[error("Partially completed: {0}")]
    PartialFailure(Value),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
            AppError::ValidationError(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "Validation failed", "fields": fields }),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::ExternalService(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, json!({ "error": msg })),
            AppError::PartialFailure(detail) => (StatusCode::CONFLICT, detail),
        };

        tracing::error!("Error: {}: {}", status, body);

        (status, Json(body)).into_response()
    }
}

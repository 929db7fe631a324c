//! API and startup error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ParseStreamIdError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<ParseStreamIdError> for ApiError {
    fn from(err: ParseStreamIdError) -> Self {
        ApiError::NotFound(err.to_string())
    }
}

/// Failures while wiring up the backing store at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

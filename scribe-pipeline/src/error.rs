//! Error types for scribe-pipeline HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scribe_common::api::ErrorResponse;
use thiserror::Error;

use crate::store::StoreError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., results requested before processing finished
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Store(ref err @ (StoreError::NotFound(_) | StoreError::UnknownId(_))) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            ApiError::Store(ref err @ StoreError::ResultsNotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            ApiError::Store(ref err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", err.to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %message, "Request failed");
        }

        (status, Json(ErrorResponse::new(error_code, message))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

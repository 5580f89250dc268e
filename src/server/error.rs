//! Error types and response handling for the HTTP surface.
//!
//! Provides HTTP status code mapping and JSON error response generation.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionError;
use crate::toolchain::BuildError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// Malformed query, body or path parameter
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// Map error variant to appropriate HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Session(err) => match err {
                SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                SessionError::InvalidOffset { .. } => StatusCode::BAD_REQUEST,
                SessionError::ClosedStream => StatusCode::CONFLICT,
                SessionError::ResourceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Build(err) => match err {
                BuildError::UnsupportedLanguage(_) | BuildError::UnsupportedCompiler(_) => {
                    StatusCode::BAD_REQUEST
                }
                BuildError::CompileFailed { .. } | BuildError::TimedOut { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                BuildError::CompilerUnavailable { .. } | BuildError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get error type string for JSON responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Session(err) => match err {
                SessionError::NotFound(_) => "not_found",
                SessionError::InvalidOffset { .. } => "invalid_offset",
                SessionError::ClosedStream => "closed_stream",
                SessionError::ResourceExhausted { .. } => "resource_exhausted",
                SessionError::Spawn { .. } => "spawn_error",
            },
            ApiError::Build(err) => match err {
                BuildError::UnsupportedLanguage(_) => "unsupported_language",
                BuildError::UnsupportedCompiler(_) => "unsupported_compiler",
                BuildError::CompileFailed { .. } => "compile_error",
                BuildError::TimedOut { .. } => "compile_timeout",
                BuildError::CompilerUnavailable { .. } | BuildError::Io(_) => "build_error",
            },
            ApiError::BadRequest(_) => "invalid_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(request_id = %request_id, "{self}");
        } else {
            tracing::debug!(request_id = %request_id, status = status.as_u16(), "{self}");
        }
        ErrorResponse::from_error(&self, &request_id)
    }
}

/// Builder for standardized error responses
pub struct ErrorResponse;

impl ErrorResponse {
    /// Create a JSON error response from an ApiError
    pub fn from_error(err: &ApiError, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": err.error_type(),
                "message": err.to_string(),
                "request_id": request_id
            }
        });

        (err.status_code(), Json(body)).into_response()
    }
}

//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered to HTTP clients.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boothnow_core::{EngineError, PortError};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A session-lifecycle rule was violated or the engine's collaborators failed.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error while running the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The request body or parameters were malformed.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable kind, e.g. `CONFLICT`.
    pub error: String,
    pub message: String,
}

impl ApiError {
    /// Status code and machine-readable kind for this error.
    pub fn kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Engine(EngineError::NotFound(_)) | Self::Port(PortError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            Self::Engine(EngineError::Conflict(_)) | Self::Port(PortError::Conflict(_)) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            Self::Engine(EngineError::InvalidState(_)) | Self::Port(PortError::InvalidState(_)) => {
                (StatusCode::CONFLICT, "INVALID_STATE")
            }
            Self::Engine(EngineError::Validation(_)) | Self::Validation(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Engine(EngineError::Upstream(_))
            | Self::Port(PortError::Unexpected(_))
            | Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.kind();
        let message = if status.is_server_error() {
            // Detail stays in the logs.
            error!(error = %self, "Request failed");
            "An internal error occurred. Please try again later.".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: kind.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_distinct_statuses() {
        let cases = [
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (EngineError::Conflict("x".into()), StatusCode::CONFLICT, "CONFLICT"),
            (EngineError::InvalidState("x".into()), StatusCode::CONFLICT, "INVALID_STATE"),
            (EngineError::Validation("x".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (
                EngineError::Upstream("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "UPSTREAM_ERROR",
            ),
        ];
        for (err, status, kind) in cases {
            assert_eq!(ApiError::from(err).kind(), (status, kind));
        }
    }

    #[test]
    fn server_errors_hide_their_detail() {
        let response =
            ApiError::Engine(EngineError::Upstream("connection refused to 10.0.0.4".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

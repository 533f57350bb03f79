//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use revision_tracker_core::ports::PortError;
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core ports.
    #[error("{0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure to apply the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A request that was rejected before reaching the core.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Port(PortError::Validation(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Port(PortError::Unauthorized) => StatusCode::UNAUTHORIZED,
            ApiError::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Port(PortError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Port(PortError::Storage(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            match &self {
                ApiError::Port(PortError::Storage(_)) => {
                    "Storage is temporarily unavailable, please retry".to_string()
                }
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

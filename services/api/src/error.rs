//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! reported to HTTP clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use summary_stream_core::{PortError, SummaryError};
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error raised by the summary aggregator.
    #[error("Summary error: {0}")]
    Summary(#[from] SummaryError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure to apply the database migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents an error related to the WebSocket connection.
    #[error("WebSocket Error: {0}")]
    Websocket(#[from] axum::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was well formed but cannot be served as sent.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Summary(SummaryError::NotFound(_)) | ApiError::Port(PortError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Summary(SummaryError::InvariantViolation(_)) => StatusCode::CONFLICT,
            ApiError::Summary(SummaryError::Persistence(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Summary(SummaryError::SectionBackendFailure { .. })
            | ApiError::Port(PortError::Backend { .. }) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed.");
        }
        (status, self.to_string()).into_response()
    }
}

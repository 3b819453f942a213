//! services/dashboard/src/error.rs
//!
//! Defines the primary error type for the dashboard service and how it maps onto
//! HTTP responses.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use session_ledger_core::{EngineError, PortError};
use tracing::error;
use uuid::Uuid;

/// The primary error type for the `dashboard` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An error raised by the query and metrics engine.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Represents an error that propagated up from the record store port.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error from running the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The addressed history view does not exist (or was closed).
    #[error("History view {0} not found")]
    ViewNotFound(Uuid),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::InvalidFilterSpecification(_))
            | ApiError::Engine(EngineError::ExportFieldUnknown(_)) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::AdapterUnavailable(_))
            | ApiError::Engine(EngineError::SubscriptionDropped(_))
            | ApiError::Port(PortError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Port(PortError::NotFound(_)) | ApiError::ViewNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {:?}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

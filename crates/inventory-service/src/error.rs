//! Inventory errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use event_bus::HandlerError;
use thiserror::Error;

/// Errors raised by the inventory store and service.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("inventory for jar {0} not found")]
    NotFound(String),

    #[error("inventory for jar {0} already exists")]
    AlreadyExists(String),

    #[error("insufficient stock for jar {jar_id}: requested {requested}, available {available}")]
    InsufficientStock {
        jar_id: String,
        requested: i32,
        available: i32,
    },

    #[error("cannot release {requested} of jar {jar_id}: only {reserved} reserved")]
    InsufficientReserved {
        jar_id: String,
        requested: i32,
        reserved: i32,
    },

    #[error("stock for jar {0} would exceed the supported maximum")]
    Overflow(String),

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl InventoryError {
    /// Transient failures worth retrying from the event path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::Unavailable(_) | InventoryError::Database(_))
    }
}

impl From<InventoryError> for HandlerError {
    fn from(err: InventoryError) -> Self {
        if err.is_retryable() {
            HandlerError::retryable(err.to_string())
        } else {
            HandlerError::permanent(err.to_string())
        }
    }
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        match &err {
            InventoryError::Validation(_) => ApiError::BadRequest(err.to_string()),
            InventoryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            InventoryError::AlreadyExists(_)
            | InventoryError::InsufficientStock { .. }
            | InventoryError::InsufficientReserved { .. }
            | InventoryError::Overflow(_) => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

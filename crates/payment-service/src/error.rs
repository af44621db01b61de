//! Payment errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use event_bus::HandlerError;
use thiserror::Error;

/// Errors raised by the payment store, service and settlement workers.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("payment for order {0} already exists")]
    DuplicateOrder(i64),

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("settlement queue closed")]
    SettlementClosed,

    #[error("failed to publish payment event: {0}")]
    Publish(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl PaymentError {
    /// Transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Unavailable(_) | PaymentError::Database(_) | PaymentError::Publish(_)
        )
    }
}

impl From<PaymentError> for HandlerError {
    fn from(err: PaymentError) -> Self {
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

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::Validation(_) => ApiError::BadRequest(err.to_string()),
            PaymentError::NotFound(_) => ApiError::NotFound(err.to_string()),
            PaymentError::DuplicateOrder(_) => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

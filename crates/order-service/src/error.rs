//! Order errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use event_bus::{HandlerError, OrderStatus};
use thiserror::Error;

/// Errors raised by the order store and service.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("order {0} not found")]
    NotFound(i64),

    /// The order already settled into a different terminal status.
    #[error("order {order_id} is {current}, cannot become {requested}")]
    InvalidTransition {
        order_id: i64,
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("unknown payment event type: {0}")]
    UnknownEventType(String),

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl OrderError {
    /// Transient failures worth retrying from the event path.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::Unavailable(_) | OrderError::Database(_) | OrderError::NotFound(_)
        )
    }
}

impl From<OrderError> for HandlerError {
    fn from(err: OrderError) -> Self {
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

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match &err {
            OrderError::Validation(_) => ApiError::BadRequest(err.to_string()),
            OrderError::NotFound(_) => ApiError::NotFound(err.to_string()),
            OrderError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

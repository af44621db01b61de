//! Proxy error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors the gateway answers itself instead of relaying an upstream response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No instance could be resolved for the service.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The chosen instance could not be reached or answered unreadably.
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// The inbound request could not be read.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ProxyError::BadRequest(_) => tracing::debug!(error = %self, "rejected request"),
            _ => tracing::warn!(error = %self, "proxy failure"),
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<discovery::DiscoveryError> for ProxyError {
    fn from(err: discovery::DiscoveryError) -> Self {
        ProxyError::ServiceUnavailable(err.to_string())
    }
}

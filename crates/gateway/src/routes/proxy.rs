//! Catch-all forwarding endpoint.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use discovery::ServiceRegistry;

use crate::error::ProxyError;
use crate::proxy::ProxyState;

/// ANY /api/{service}/**: relays the request to an instance of the service.
#[tracing::instrument(skip(state, req), fields(method = %req.method(), path = %req.uri().path()))]
pub async fn forward<R: ServiceRegistry + 'static>(
    State(state): State<Arc<ProxyState<R>>>,
    req: Request,
) -> Result<Response, ProxyError> {
    state.forward(req).await
}

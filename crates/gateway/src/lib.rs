//! API gateway.
//!
//! Routes `/api/{segment}/**` to the logical service mapped from `segment`,
//! picking an instance through the discovery load balancer, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod proxy;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::any;
use discovery::ServiceRegistry;
use metrics_exporter_prometheus::PrometheusHandle;

use proxy::ProxyState;

/// Creates the gateway router.
pub fn create_app<R: ServiceRegistry + 'static>(
    state: Arc<ProxyState<R>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let app = Router::new()
        .route("/api/{service}", any(routes::proxy::forward::<R>))
        .route("/api/{service}/{*rest}", any(routes::proxy::forward::<R>))
        .with_state(state);

    common::http::with_observability(app, metrics_handle)
}

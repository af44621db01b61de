//! Order saga participant.
//!
//! Stores orders, starts the saga with `order.created` and settles each order
//! once the payment outcome arrives on `payment-events`.

pub mod error;
pub mod events;
pub mod model;
pub mod routes;
pub mod service;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;

use routes::orders::AppState;
use store::OrderStore;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let app = Router::new()
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/user/{user_id}", get(routes::orders::list_by_user::<S>))
        .with_state(state);

    common::http::with_observability(app, metrics_handle)
}

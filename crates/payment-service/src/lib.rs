//! Payment saga participant.
//!
//! Opens a payment for every new order, settles it in the background after a
//! simulated processor delay and announces the outcome on `payment-events`.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod routes;
pub mod service;
pub mod settlement;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;

use routes::payments::AppState;
use store::PaymentStore;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: PaymentStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let app = Router::new()
        .route("/payments", post(routes::payments::create::<S>))
        .route("/payments/{id}", get(routes::payments::get::<S>))
        .route(
            "/payments/order/{order_id}",
            get(routes::payments::get_by_order::<S>),
        )
        .with_state(state);

    common::http::with_observability(app, metrics_handle)
}

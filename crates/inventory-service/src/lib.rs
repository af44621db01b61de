//! Inventory saga participant.
//!
//! Keeps per-jar stock, reserves it when an order is created and gives it back
//! when the order is cancelled. Reservations are tracked per order so
//! redelivered events never move stock twice.

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

use routes::inventory::AppState;
use store::InventoryStore;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: InventoryStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let app = Router::new()
        .route("/inventory", post(routes::inventory::create::<S>))
        .route(
            "/inventory/{jar_id}",
            get(routes::inventory::get::<S>).put(routes::inventory::update::<S>),
        )
        .with_state(state);

    common::http::with_observability(app, metrics_handle)
}

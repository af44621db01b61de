//! Inventory endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::error::ApiError;
use crate::model::{CreateInventoryRequest, Inventory, UpdateInventoryRequest};
use crate::service::InventoryService;
use crate::store::InventoryStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub service: Arc<InventoryService<S>>,
}

/// POST /inventory: stock a new jar.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateInventoryRequest>,
) -> Result<(StatusCode, Json<Inventory>), ApiError> {
    let item = state.service.create_inventory(req).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// GET /inventory/{jar_id}
#[tracing::instrument(skip(state))]
pub async fn get<S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(jar_id): Path<String>,
) -> Result<Json<Inventory>, ApiError> {
    Ok(Json(state.service.get_inventory(&jar_id).await?))
}

/// PUT /inventory/{jar_id}: overwrite available quantity.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(jar_id): Path<String>,
    Json(req): Json<UpdateInventoryRequest>,
) -> Result<Json<Inventory>, ApiError> {
    Ok(Json(state.service.update_inventory(&jar_id, req).await?))
}

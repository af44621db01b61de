//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::ApiError;
use crate::model::{CreateOrderRequest, Order};
use crate::service::OrderService;
use crate::store::OrderStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub service: Arc<OrderService<S>>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// POST /orders: create a pending order and start the saga.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.service.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders?limit&offset: newest orders first.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state.service.list_orders(params.limit, params.offset).await?;
    Ok(Json(orders))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id = parse_id(&id, "order ID")?;
    Ok(Json(state.service.get_order(id).await?))
}

/// GET /orders/user/{user_id}
#[tracing::instrument(skip(state))]
pub async fn list_by_user<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let user_id = parse_id(&user_id, "user ID")?;
    Ok(Json(state.service.list_orders_by_user(user_id).await?))
}

fn parse_id(raw: &str, what: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what}")))
}

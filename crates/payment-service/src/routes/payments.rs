//! Payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::error::ApiError;
use crate::model::{CreatePaymentRequest, Payment};
use crate::service::PaymentService;
use crate::store::PaymentStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub service: Arc<PaymentService<S>>,
}

/// POST /payments: open a pending payment and schedule settlement.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: PaymentStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let payment = state.service.create_payment(req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// GET /payments/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: PaymentStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_id(&id, "payment ID")?;
    Ok(Json(state.service.get_payment(id).await?))
}

/// GET /payments/order/{order_id}
#[tracing::instrument(skip(state))]
pub async fn get_by_order<S: PaymentStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let order_id = parse_id(&order_id, "order ID")?;
    Ok(Json(state.service.get_payment_by_order(order_id).await?))
}

fn parse_id(raw: &str, what: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what}")))
}

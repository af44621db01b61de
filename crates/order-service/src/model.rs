//! Order entity and request types.

use chrono::{DateTime, Utc};
use event_bus::{OrderEventPayload, OrderStatus};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// A customer's order for a quantity of one jar.
///
/// Only `status` and `updated_at` change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub jar_id: String,
    pub quantity: i32,
    pub total_price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds the payload carried by `order.*` events.
    pub fn event_payload(&self) -> OrderEventPayload {
        OrderEventPayload {
            order_id: self.id,
            user_id: self.user_id,
            jar_id: self.jar_id.clone(),
            quantity: self.quantity,
            status: self.status,
        }
    }

    /// Saga correlation id and bus key.
    pub fn correlation_id(&self) -> String {
        self.id.to_string()
    }
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub jar_id: String,
    pub quantity: i32,
    pub total_price: f64,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.user_id <= 0 {
            return Err(OrderError::Validation("user_id is required".to_string()));
        }
        if self.jar_id.trim().is_empty() {
            return Err(OrderError::Validation("jar_id is required".to_string()));
        }
        if self.quantity <= 0 {
            return Err(OrderError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        if !self.total_price.is_finite() || self.total_price <= 0.0 {
            return Err(OrderError::Validation(
                "total_price must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A validated order ready to be stored as `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: i64,
    pub jar_id: String,
    pub quantity: i32,
    pub total_price: f64,
}

impl TryFrom<CreateOrderRequest> for NewOrder {
    type Error = OrderError;

    fn try_from(req: CreateOrderRequest) -> Result<Self, Self::Error> {
        req.validate()?;
        Ok(Self {
            user_id: req.user_id,
            jar_id: req.jar_id.trim().to_string(),
            quantity: req.quantity,
            total_price: req.total_price,
        })
    }
}

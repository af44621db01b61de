//! Saga event vocabulary shared by every participant.
//!
//! Events travel as JSON bodies of the shape
//! `{"type", "correlation_id", "payload", "timestamp"}`. The `type` string is kept
//! as-is on decode so handlers can reject types they do not understand.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic the order participant publishes to.
pub const ORDER_EVENTS_TOPIC: &str = "order-events";

/// Topic the payment participant publishes to.
pub const PAYMENT_EVENTS_TOPIC: &str = "payment-events";

/// Topic the inventory participant publishes to.
pub const INVENTORY_EVENTS_TOPIC: &str = "inventory-events";

/// The saga event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OrderCreated,
    OrderStatusUpdated,
    InventoryCreated,
    InventoryUpdated,
    InventoryReserved,
    InventoryReleased,
    PaymentCompleted,
    PaymentFailed,
}

impl EventType {
    /// Returns the wire name, e.g. `"order.created"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderStatusUpdated => "order.status_updated",
            EventType::InventoryCreated => "inventory.created",
            EventType::InventoryUpdated => "inventory.updated",
            EventType::InventoryReserved => "inventory.reserved",
            EventType::InventoryReleased => "inventory.released",
            EventType::PaymentCompleted => "payment.completed",
            EventType::PaymentFailed => "payment.failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a wire name does not match any known event type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order.created" => Ok(EventType::OrderCreated),
            "order.status_updated" => Ok(EventType::OrderStatusUpdated),
            "inventory.created" => Ok(EventType::InventoryCreated),
            "inventory.updated" => Ok(EventType::InventoryUpdated),
            "inventory.reserved" => Ok(EventType::InventoryReserved),
            "inventory.released" => Ok(EventType::InventoryReleased),
            "payment.completed" => Ok(EventType::PaymentCompleted),
            "payment.failed" => Ok(EventType::PaymentFailed),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}

/// A saga event as carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub correlation_id: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SagaEvent {
    /// Builds an event stamped with the current time.
    pub fn new<P: Serialize>(
        kind: EventType,
        correlation_id: impl Into<String>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: kind.as_str().to_string(),
            correlation_id: correlation_id.into(),
            payload: serde_json::to_value(payload)?,
            timestamp: Utc::now(),
        })
    }

    /// Parses the `type` field.
    pub fn kind(&self) -> Result<EventType, UnknownEventType> {
        self.event_type.parse()
    }

    /// Decodes the payload into a typed struct.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Order lifecycle status.
///
/// ```text
/// pending ──┬──► confirmed
///           └──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Payment lifecycle status. Transitions exactly once out of `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Payload of `order.created` and `order.status_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEventPayload {
    pub order_id: i64,
    pub user_id: i64,
    pub jar_id: String,
    pub quantity: i32,
    pub status: OrderStatus,
}

/// Payload of `payment.completed` and `payment.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEventPayload {
    pub payment_id: i64,
    pub order_id: i64,
    pub amount: f64,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Payload of the `inventory.*` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEventPayload {
    pub jar_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    pub quantity: i32,
    pub reserved: i32,
}

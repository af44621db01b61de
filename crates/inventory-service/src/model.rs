//! Inventory entity, reservation ledger entries and request types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use event_bus::InventoryEventPayload;
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// Stock held for one jar.
///
/// `quantity` is what can still be reserved; `reserved` is what pending orders hold.
/// Both stay non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub jar_id: String,
    pub quantity: i32,
    pub reserved: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    /// Builds the payload carried by `inventory.*` events.
    pub fn event_payload(&self, order_id: Option<i64>) -> InventoryEventPayload {
        InventoryEventPayload {
            jar_id: self.jar_id.clone(),
            order_id,
            quantity: self.quantity,
            reserved: self.reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Reserved,
    Released,
    /// The order was cancelled before it reserved anything.
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Released => "released",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(ReservationStatus::Reserved),
            "released" => Ok(ReservationStatus::Released),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// Ledger entry recording the stock an order took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: i64,
    pub jar_id: String,
    pub quantity: i32,
    pub status: ReservationStatus,
}

/// Body of `POST /inventory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInventoryRequest {
    pub jar_id: String,
    pub quantity: i32,
}

impl CreateInventoryRequest {
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.jar_id.trim().is_empty() {
            return Err(InventoryError::Validation("jar_id is required".to_string()));
        }
        validate_stock(self.quantity)
    }
}

/// Body of `PUT /inventory/{jar_id}`. Overwrites the available quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInventoryRequest {
    pub quantity: i32,
}

impl UpdateInventoryRequest {
    pub fn validate(&self) -> Result<(), InventoryError> {
        validate_stock(self.quantity)
    }
}

fn validate_stock(quantity: i32) -> Result<(), InventoryError> {
    if quantity < 0 {
        return Err(InventoryError::Validation(
            "quantity must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Quantities moved by reserve and release.
pub(crate) fn validate_amount(quantity: i32) -> Result<(), InventoryError> {
    if quantity <= 0 {
        return Err(InventoryError::Validation(
            "quantity must be positive".to_string(),
        ));
    }
    Ok(())
}

//! Payment entity and request types.

use chrono::{DateTime, Utc};
use event_bus::{PaymentEventPayload, PaymentStatus};
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// Method recorded for payments the saga opens on its own.
pub const DEFAULT_PAYMENT_METHOD: &str = "credit_card";

/// A payment for one order. Leaves `pending` exactly once, through settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub amount: f64,
    pub payment_method: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Builds the payload carried by `payment.*` events.
    pub fn event_payload(&self) -> PaymentEventPayload {
        PaymentEventPayload {
            payment_id: self.id,
            order_id: self.order_id,
            amount: self.amount,
            status: self.status,
            transaction_id: self.transaction_id.clone(),
        }
    }
}

fn default_payment_method() -> String {
    DEFAULT_PAYMENT_METHOD.to_string()
}

/// Body of `POST /payments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: i64,
    pub amount: f64,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.order_id <= 0 {
            return Err(PaymentError::Validation("order_id is required".to_string()));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(PaymentError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if self.payment_method.trim().is_empty() {
            return Err(PaymentError::Validation(
                "payment_method is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// A validated payment ready to be stored as `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_id: i64,
    pub amount: f64,
    pub payment_method: String,
}

impl TryFrom<CreatePaymentRequest> for NewPayment {
    type Error = PaymentError;

    fn try_from(req: CreatePaymentRequest) -> Result<Self, Self::Error> {
        req.validate()?;
        Ok(Self {
            order_id: req.order_id,
            amount: req.amount,
            payment_method: req.payment_method.trim().to_string(),
        })
    }
}

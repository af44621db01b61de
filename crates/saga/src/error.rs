//! Harness error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while driving the choreography.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A condition did not hold before the deadline.
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("order error: {0}")]
    Order(#[from] order_service::error::OrderError),

    #[error("inventory error: {0}")]
    Inventory(#[from] inventory_service::error::InventoryError),

    #[error("payment error: {0}")]
    Payment(#[from] payment_service::error::PaymentError),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

//! Payment persistence.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use event_bus::PaymentStatus;

use crate::error::PaymentError;
use crate::model::{NewPayment, Payment};

pub use memory::InMemoryPaymentStore;
pub use postgres::PostgresPaymentStore;

/// Result type for payment store operations.
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Persistent store of payments. Holds at most one payment per order.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a `pending` payment, or fails with `DuplicateOrder`.
    async fn create(&self, payment: NewPayment) -> Result<Payment>;

    async fn get(&self, id: i64) -> Result<Option<Payment>>;

    async fn get_by_order(&self, order_id: i64) -> Result<Option<Payment>>;

    /// Moves a `pending` payment to its terminal `status` in one conditional write.
    ///
    /// Returns `None` when the payment is missing or already settled.
    async fn settle(
        &self,
        id: i64,
        status: PaymentStatus,
        transaction_id: &str,
    ) -> Result<Option<Payment>>;

    /// Payments still waiting for settlement, oldest first.
    async fn list_pending(&self) -> Result<Vec<Payment>>;
}

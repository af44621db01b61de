//! Order persistence.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use event_bus::OrderStatus;

use crate::error::OrderError;
use crate::model::{NewOrder, Order};

pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderError>;

/// Persistent store of orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new `pending` order and returns it with its assigned id.
    async fn create(&self, order: NewOrder) -> Result<Order>;

    async fn get(&self, id: i64) -> Result<Option<Order>>;

    /// Newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Order>>;

    /// Newest first.
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Order>>;

    /// Moves a `pending` order to `status` in one conditional write.
    ///
    /// Returns the updated order, or `None` when the order is missing or no
    /// longer pending.
    async fn transition_from_pending(&self, id: i64, status: OrderStatus)
    -> Result<Option<Order>>;
}

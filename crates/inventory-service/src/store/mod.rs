//! Inventory persistence.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::InventoryError;
use crate::model::{Inventory, Reservation};

pub use memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;

/// Result type for inventory store operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Persistent store of per-jar stock.
///
/// Every stock change is a single conditional write, so concurrent callers can
/// never drive `quantity` or `reserved` below zero.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Fails with `AlreadyExists` when the jar is already stocked.
    async fn create(&self, jar_id: &str, quantity: i32) -> Result<Inventory>;

    async fn get(&self, jar_id: &str) -> Result<Option<Inventory>>;

    /// Overwrites the available quantity. `None` when the jar is unknown.
    async fn set_quantity(&self, jar_id: &str, quantity: i32) -> Result<Option<Inventory>>;

    /// Moves `quantity` from available to reserved, all or nothing.
    async fn reserve(&self, jar_id: &str, quantity: i32) -> Result<Inventory>;

    /// Moves `quantity` from reserved back to available, all or nothing.
    async fn release(&self, jar_id: &str, quantity: i32) -> Result<Inventory>;

    /// Reserves stock on behalf of an order and records it in the ledger.
    ///
    /// Returns `None` without touching stock when the order already has a
    /// ledger entry, including one left by an earlier cancellation.
    async fn reserve_for_order(
        &self,
        order_id: i64,
        jar_id: &str,
        quantity: i32,
    ) -> Result<Option<Inventory>>;

    /// Releases whatever the order reserved and marks the entry released.
    ///
    /// Returns `None` when the order holds no active reservation. An order with
    /// no entry at all gets a `cancelled` one, so a reservation arriving after
    /// the cancellation is refused.
    async fn release_for_order(&self, order_id: i64, jar_id: &str) -> Result<Option<Inventory>>;

    async fn reservation(&self, order_id: i64) -> Result<Option<Reservation>>;
}

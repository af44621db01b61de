use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{InventoryStore, Result};
use crate::error::InventoryError;
use crate::model::{Inventory, Reservation, ReservationStatus};

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    items: HashMap<String, Inventory>,
    reservations: HashMap<i64, Reservation>,
    fail_on_update: bool,
}

impl InMemoryInventoryState {
    fn check_available(&self) -> Result<()> {
        if self.fail_on_update {
            return Err(InventoryError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn take(&mut self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let item = self
            .items
            .get_mut(jar_id)
            .ok_or_else(|| InventoryError::NotFound(jar_id.to_string()))?;
        if item.quantity < quantity {
            return Err(InventoryError::InsufficientStock {
                jar_id: jar_id.to_string(),
                requested: quantity,
                available: item.quantity,
            });
        }
        let (Some(available), Some(reserved)) = (
            item.quantity.checked_sub(quantity),
            item.reserved.checked_add(quantity),
        ) else {
            return Err(InventoryError::Overflow(jar_id.to_string()));
        };
        item.quantity = available;
        item.reserved = reserved;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    fn give_back(&mut self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let item = self
            .items
            .get_mut(jar_id)
            .ok_or_else(|| InventoryError::NotFound(jar_id.to_string()))?;
        if item.reserved < quantity {
            return Err(InventoryError::InsufficientReserved {
                jar_id: jar_id.to_string(),
                requested: quantity,
                reserved: item.reserved,
            });
        }
        let (Some(available), Some(reserved)) = (
            item.quantity.checked_add(quantity),
            item.reserved.checked_sub(quantity),
        ) else {
            return Err(InventoryError::Overflow(jar_id.to_string()));
        };
        item.quantity = available;
        item.reserved = reserved;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }
}

/// In-memory inventory store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail stock changes with a transient error.
    pub async fn set_fail_on_update(&self, fail: bool) {
        self.state.write().await.fail_on_update = fail;
    }

    /// Returns the number of ledger entries, released ones included.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn create(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let mut state = self.state.write().await;
        if state.items.contains_key(jar_id) {
            return Err(InventoryError::AlreadyExists(jar_id.to_string()));
        }
        let now = Utc::now();
        let item = Inventory {
            jar_id: jar_id.to_string(),
            quantity,
            reserved: 0,
            created_at: now,
            updated_at: now,
        };
        state.items.insert(jar_id.to_string(), item.clone());
        Ok(item)
    }

    async fn get(&self, jar_id: &str) -> Result<Option<Inventory>> {
        Ok(self.state.read().await.items.get(jar_id).cloned())
    }

    async fn set_quantity(&self, jar_id: &str, quantity: i32) -> Result<Option<Inventory>> {
        let mut state = self.state.write().await;
        state.check_available()?;
        Ok(state.items.get_mut(jar_id).map(|item| {
            item.quantity = quantity;
            item.updated_at = Utc::now();
            item.clone()
        }))
    }

    async fn reserve(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let mut state = self.state.write().await;
        state.check_available()?;
        state.take(jar_id, quantity)
    }

    async fn release(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let mut state = self.state.write().await;
        state.check_available()?;
        state.give_back(jar_id, quantity)
    }

    async fn reserve_for_order(
        &self,
        order_id: i64,
        jar_id: &str,
        quantity: i32,
    ) -> Result<Option<Inventory>> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if state.reservations.contains_key(&order_id) {
            return Ok(None);
        }
        let item = state.take(jar_id, quantity)?;
        state.reservations.insert(
            order_id,
            Reservation {
                order_id,
                jar_id: jar_id.to_string(),
                quantity,
                status: ReservationStatus::Reserved,
            },
        );
        Ok(Some(item))
    }

    async fn release_for_order(&self, order_id: i64, jar_id: &str) -> Result<Option<Inventory>> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let (jar_id, quantity) = match state.reservations.get(&order_id) {
            Some(r) if r.status == ReservationStatus::Reserved => (r.jar_id.clone(), r.quantity),
            Some(_) => return Ok(None),
            None => {
                state.reservations.insert(
                    order_id,
                    Reservation {
                        order_id,
                        jar_id: jar_id.to_string(),
                        quantity: 0,
                        status: ReservationStatus::Cancelled,
                    },
                );
                return Ok(None);
            }
        };
        let item = state.give_back(&jar_id, quantity)?;
        if let Some(reservation) = state.reservations.get_mut(&order_id) {
            reservation.status = ReservationStatus::Released;
        }
        Ok(Some(item))
    }

    async fn reservation(&self, order_id: i64) -> Result<Option<Reservation>> {
        Ok(self.state.read().await.reservations.get(&order_id).cloned())
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use event_bus::OrderStatus;
use tokio::sync::RwLock;

use super::{OrderStore, Result};
use crate::error::OrderError;
use crate::model::{NewOrder, Order};

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: BTreeMap<i64, Order>,
    next_id: i64,
    fail_on_update: bool,
}

/// In-memory order store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail status transitions with a transient error.
    pub async fn set_fail_on_update(&self, fail: bool) {
        self.state.write().await.fail_on_update = fail;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let now = Utc::now();
        let order = Order {
            id: state.next_id,
            user_id: order.user_id,
            jar_id: order.jar_id,
            quantity: order.quantity,
            total_price: order.total_price,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .rev()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn transition_from_pending(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<Option<Order>> {
        let mut state = self.state.write().await;
        if state.fail_on_update {
            return Err(OrderError::Unavailable("simulated store failure".to_string()));
        }

        match state.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = status;
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(user_id: i64) -> NewOrder {
        NewOrder {
            user_id,
            jar_id: "A".to_string(),
            quantity: 1,
            total_price: 10.0,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_pending() {
        let store = InMemoryOrderStore::new();
        let first = store.create(new_order(1)).await.unwrap();
        let second = store.create(new_order(1)).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.status, OrderStatus::Pending);
        assert_eq!(store.get(2).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paged() {
        let store = InMemoryOrderStore::new();
        for user in [1, 2, 1, 3] {
            store.create(new_order(user)).await.unwrap();
        }

        let ids: Vec<i64> = store.list(2, 1).await.unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let ids: Vec<i64> = store
            .list_by_user(1)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_transition_only_from_pending() {
        let store = InMemoryOrderStore::new();
        let order = store.create(new_order(1)).await.unwrap();

        let updated = store
            .transition_from_pending(order.id, OrderStatus::Confirmed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);

        let again = store
            .transition_from_pending(order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(
            store.get(order.id).await.unwrap().unwrap().status,
            OrderStatus::Confirmed
        );
        assert!(
            store
                .transition_from_pending(99, OrderStatus::Confirmed)
                .await
                .unwrap()
                .is_none()
        );
    }
}

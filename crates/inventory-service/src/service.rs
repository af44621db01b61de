//! Inventory use cases: stock administration and saga-driven reservations.

use std::sync::Arc;

use event_bus::{
    EventBus, EventBusExt, EventType, Headers, OrderEventPayload, OrderStatus, SagaEvent,
};

use crate::error::InventoryError;
use crate::model::{CreateInventoryRequest, Inventory, UpdateInventoryRequest, validate_amount};
use crate::store::{InventoryStore, Result};

/// Service for managing stock.
///
/// Owns the inventory store and publishes `inventory.*` events on `topic`.
pub struct InventoryService<S> {
    store: S,
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl<S: InventoryStore> InventoryService<S> {
    pub fn new(store: S, bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            store,
            bus,
            topic: topic.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self, req), fields(jar_id = %req.jar_id))]
    pub async fn create_inventory(&self, req: CreateInventoryRequest) -> Result<Inventory> {
        req.validate()?;
        let item = self.store.create(req.jar_id.trim(), req.quantity).await?;

        tracing::info!(jar_id = %item.jar_id, quantity = item.quantity, "inventory created");
        self.publish(EventType::InventoryCreated, &item, None).await;
        Ok(item)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_inventory(&self, jar_id: &str) -> Result<Inventory> {
        self.store
            .get(jar_id)
            .await?
            .ok_or_else(|| InventoryError::NotFound(jar_id.to_string()))
    }

    /// Overwrites the available quantity; `reserved` is untouched.
    #[tracing::instrument(skip(self, req))]
    pub async fn update_inventory(
        &self,
        jar_id: &str,
        req: UpdateInventoryRequest,
    ) -> Result<Inventory> {
        req.validate()?;
        let item = self
            .store
            .set_quantity(jar_id, req.quantity)
            .await?
            .ok_or_else(|| InventoryError::NotFound(jar_id.to_string()))?;

        tracing::info!(jar_id, quantity = item.quantity, "inventory updated");
        self.publish(EventType::InventoryUpdated, &item, None).await;
        Ok(item)
    }

    /// Reserves `quantity` units or fails with `InsufficientStock`, leaving stock unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        validate_amount(quantity)?;
        let item = self.store.reserve(jar_id, quantity).await?;

        metrics::counter!("inventory_reservations_total").increment(1);
        self.publish(EventType::InventoryReserved, &item, None).await;
        Ok(item)
    }

    /// Returns `quantity` reserved units to available stock.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        validate_amount(quantity)?;
        let item = self.store.release(jar_id, quantity).await?;

        metrics::counter!("inventory_releases_total").increment(1);
        self.publish(EventType::InventoryReleased, &item, None).await;
        Ok(item)
    }

    /// Reacts to an `order-events` message.
    ///
    /// `order.created` reserves the ordered quantity and `order.status_updated`
    /// to `cancelled` releases it. Each order reserves and releases at most once.
    /// Running out of stock is logged, not retried. Other events are ignored.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, correlation_id = %event.correlation_id))]
    pub async fn handle_order_event(&self, event: &SagaEvent) -> Result<()> {
        let kind = match event.kind() {
            Ok(kind @ (EventType::OrderCreated | EventType::OrderStatusUpdated)) => kind,
            _ => {
                tracing::debug!("ignoring event");
                return Ok(());
            }
        };
        let payload: OrderEventPayload = event
            .payload_as()
            .map_err(|e| InventoryError::InvalidPayload(e.to_string()))?;

        match kind {
            EventType::OrderCreated => self.reserve_for_order(&payload).await,
            _ if payload.status == OrderStatus::Cancelled => self.release_for_order(&payload).await,
            _ => Ok(()),
        }
    }

    async fn reserve_for_order(&self, order: &OrderEventPayload) -> Result<()> {
        validate_amount(order.quantity)?;
        match self
            .store
            .reserve_for_order(order.order_id, &order.jar_id, order.quantity)
            .await
        {
            Ok(Some(item)) => {
                metrics::counter!("inventory_reservations_total").increment(1);
                tracing::info!(order_id = order.order_id, jar_id = %order.jar_id, quantity = order.quantity, "stock reserved for order");
                self.publish(EventType::InventoryReserved, &item, Some(order.order_id))
                    .await;
                Ok(())
            }
            Ok(None) => {
                tracing::info!(order_id = order.order_id, "order already reserved");
                Ok(())
            }
            Err(e @ InventoryError::InsufficientStock { .. }) => {
                metrics::counter!("inventory_insufficient_stock_total").increment(1);
                tracing::warn!(order_id = order.order_id, error = %e, "cannot reserve stock for order");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn release_for_order(&self, order: &OrderEventPayload) -> Result<()> {
        match self
            .store
            .release_for_order(order.order_id, &order.jar_id)
            .await?
        {
            Some(item) => {
                metrics::counter!("inventory_releases_total").increment(1);
                tracing::info!(order_id = order.order_id, jar_id = %item.jar_id, "stock released for cancelled order");
                self.publish(EventType::InventoryReleased, &item, Some(order.order_id))
                    .await;
            }
            None => {
                tracing::info!(order_id = order.order_id, "no active reservation to release");
            }
        }
        Ok(())
    }

    /// Saga-driven events are keyed by order id, direct stock changes by jar id.
    async fn publish(&self, kind: EventType, item: &Inventory, order_id: Option<i64>) {
        let key = order_id.map_or_else(|| item.jar_id.clone(), |id| id.to_string());
        let result = match SagaEvent::new(kind, key.clone(), &item.event_payload(order_id)) {
            Ok(event) => {
                self.bus
                    .publish(&self.topic, &key, &event, Headers::new())
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            metrics::counter!("inventory_publish_failures_total").increment(1);
            tracing::error!(jar_id = %item.jar_id, event_type = %kind, error = %e, "failed to publish inventory event");
        }
    }
}

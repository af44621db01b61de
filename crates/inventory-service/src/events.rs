//! Consumer side of the inventory participant: reacts to `order-events`.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError, SagaEvent};

use crate::service::InventoryService;
use crate::store::InventoryStore;

/// Consumer group the inventory participant joins on `order-events`.
pub const CONSUMER_GROUP: &str = "inventory-service-group";

/// Feeds order events into [`InventoryService::handle_order_event`].
pub struct OrderEventHandler<S> {
    service: Arc<InventoryService<S>>,
}

impl<S> OrderEventHandler<S> {
    pub fn new(service: Arc<InventoryService<S>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: InventoryStore + 'static> EventHandler for OrderEventHandler<S> {
    async fn handle(&self, event: &SagaEvent) -> Result<(), HandlerError> {
        self.service.handle_order_event(event).await?;
        Ok(())
    }
}

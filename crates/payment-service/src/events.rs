//! Consumer side of the payment participant: reacts to `order-events`.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError, SagaEvent};

use crate::service::PaymentService;
use crate::store::PaymentStore;

/// Consumer group the payment participant joins on `order-events`.
pub const CONSUMER_GROUP: &str = "payment-service-group";

/// Feeds order events into [`PaymentService::handle_order_event`].
pub struct OrderEventHandler<S> {
    service: Arc<PaymentService<S>>,
}

impl<S> OrderEventHandler<S> {
    pub fn new(service: Arc<PaymentService<S>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: PaymentStore + 'static> EventHandler for OrderEventHandler<S> {
    async fn handle(&self, event: &SagaEvent) -> Result<(), HandlerError> {
        self.service.handle_order_event(event).await?;
        Ok(())
    }
}

//! Consumer side of the order participant: reacts to `payment-events`.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError, SagaEvent};

use crate::service::OrderService;
use crate::store::OrderStore;

/// Consumer group the order participant joins on `payment-events`.
pub const CONSUMER_GROUP: &str = "order-service-group";

/// Feeds payment outcomes into [`OrderService::handle_payment_event`].
pub struct PaymentEventHandler<S> {
    service: Arc<OrderService<S>>,
}

impl<S> PaymentEventHandler<S> {
    pub fn new(service: Arc<OrderService<S>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: OrderStore + 'static> EventHandler for PaymentEventHandler<S> {
    async fn handle(&self, event: &SagaEvent) -> Result<(), HandlerError> {
        self.service.handle_payment_event(event).await?;
        Ok(())
    }
}

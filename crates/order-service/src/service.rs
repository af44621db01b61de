//! Order use cases: creation, queries and payment-driven status changes.

use std::sync::Arc;

use event_bus::{
    EventBus, EventBusExt, EventType, Headers, OrderStatus, PaymentEventPayload, SagaEvent,
};

use crate::error::OrderError;
use crate::model::{CreateOrderRequest, NewOrder, Order};
use crate::store::{OrderStore, Result};

/// Page size used when the caller gives none or a non-positive one.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Service for managing orders.
///
/// Owns the order store and publishes `order.*` events on `topic`.
pub struct OrderService<S> {
    store: S,
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl<S: OrderStore> OrderService<S> {
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

    /// Validates and stores a `pending` order, then announces it with `order.created`.
    ///
    /// A publish failure is logged; the order is still created.
    #[tracing::instrument(skip(self, req), fields(user_id = req.user_id, jar_id = %req.jar_id))]
    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<Order> {
        let new_order = NewOrder::try_from(req)?;
        let order = self.store.create(new_order).await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = order.id, "order created");

        self.publish(EventType::OrderCreated, &order).await;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, id: i64) -> Result<Order> {
        self.store.get(id).await?.ok_or(OrderError::NotFound(id))
    }

    /// Lists orders newest first. `limit` defaults to 10 and is capped at 100;
    /// a negative `offset` counts as zero.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Order>> {
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        };
        let offset = offset.unwrap_or(0).max(0);
        self.store.list(limit, offset).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        self.store.list_by_user(user_id).await
    }

    /// Applies a payment outcome to its order.
    ///
    /// `payment.completed` confirms and `payment.failed` cancels a pending order,
    /// followed by `order.status_updated`. An order already in the target status
    /// is left alone and nothing is republished. Returns the order as stored.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, correlation_id = %event.correlation_id))]
    pub async fn handle_payment_event(&self, event: &SagaEvent) -> Result<Order> {
        let target = match event.kind() {
            Ok(EventType::PaymentCompleted) => OrderStatus::Confirmed,
            Ok(EventType::PaymentFailed) => OrderStatus::Cancelled,
            _ => return Err(OrderError::UnknownEventType(event.event_type.clone())),
        };
        let payload: PaymentEventPayload = event
            .payload_as()
            .map_err(|e| OrderError::InvalidPayload(e.to_string()))?;
        let order_id = payload.order_id;

        if let Some(order) = self.store.transition_from_pending(order_id, target).await? {
            metrics::counter!("order_status_transitions_total", "status" => target.as_str())
                .increment(1);
            tracing::info!(order_id, status = %target, "order status updated");
            self.publish(EventType::OrderStatusUpdated, &order).await;
            return Ok(order);
        }

        let current = self.get_order(order_id).await?;
        if current.status == target {
            tracing::info!(order_id, status = %target, "duplicate payment outcome ignored");
            return Ok(current);
        }
        Err(OrderError::InvalidTransition {
            order_id,
            current: current.status,
            requested: target,
        })
    }

    async fn publish(&self, kind: EventType, order: &Order) {
        let result = match SagaEvent::new(kind, order.correlation_id(), &order.event_payload()) {
            Ok(event) => {
                self.bus
                    .publish(&self.topic, &order.correlation_id(), &event, Headers::new())
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            metrics::counter!("order_publish_failures_total").increment(1);
            tracing::error!(order_id = order.id, event_type = %kind, error = %e, "failed to publish order event");
        }
    }
}

//! Payment use cases: creation, queries and the reaction to new orders.

use std::sync::Arc;

use event_bus::{EventType, OrderEventPayload, SagaEvent};

use crate::error::PaymentError;
use crate::model::{CreatePaymentRequest, DEFAULT_PAYMENT_METHOD, NewPayment, Payment};
use crate::settlement::SettlementQueue;
use crate::store::{PaymentStore, Result};

/// Service for managing payments.
///
/// Creation only stores a `pending` payment; the outcome is decided later by
/// the settlement pool behind `settlement`.
pub struct PaymentService<S> {
    store: Arc<S>,
    settlement: SettlementQueue,
    mock_amount: f64,
}

impl<S: PaymentStore> PaymentService<S> {
    pub fn new(store: Arc<S>, settlement: SettlementQueue, mock_amount: f64) -> Self {
        Self {
            store,
            settlement,
            mock_amount,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stores a `pending` payment and schedules its settlement.
    ///
    /// Fails with `DuplicateOrder` when the order already has a payment.
    #[tracing::instrument(skip(self, req), fields(order_id = req.order_id))]
    pub async fn create_payment(&self, req: CreatePaymentRequest) -> Result<Payment> {
        let payment = self.store.create(NewPayment::try_from(req)?).await?;

        metrics::counter!("payments_created_total").increment(1);
        tracing::info!(payment_id = payment.id, order_id = payment.order_id, "payment created");

        self.schedule(&payment).await;
        Ok(payment)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_payment(&self, id: i64) -> Result<Payment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {id}")))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_payment_by_order(&self, order_id: i64) -> Result<Payment> {
        self.store
            .get_by_order(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment for order {order_id}")))
    }

    /// Opens a payment for each new order. An order that already has one is
    /// left alone. Other events are ignored.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, correlation_id = %event.correlation_id))]
    pub async fn handle_order_event(&self, event: &SagaEvent) -> Result<()> {
        if event.kind() != Ok(EventType::OrderCreated) {
            tracing::debug!("ignoring event");
            return Ok(());
        }
        let order: OrderEventPayload = event
            .payload_as()
            .map_err(|e| PaymentError::InvalidPayload(e.to_string()))?;

        let result = self
            .create_payment(CreatePaymentRequest {
                order_id: order.order_id,
                amount: self.mock_amount,
                payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(PaymentError::DuplicateOrder(order_id)) => {
                tracing::info!(order_id, "payment already exists for order");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-enqueues every payment left `pending`, e.g. by a crash mid-settlement.
    pub async fn recover_pending(&self) -> Result<usize> {
        let pending = self.store.list_pending().await?;
        for payment in &pending {
            self.settlement.enqueue(payment.id).await?;
        }
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "recovered pending payments");
        }
        Ok(pending.len())
    }

    /// A payment whose job cannot be queued stays pending until the next recovery.
    async fn schedule(&self, payment: &Payment) {
        if let Err(e) = self.settlement.enqueue(payment.id).await {
            tracing::error!(payment_id = payment.id, error = %e, "failed to schedule settlement");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use event_bus::{InMemoryEventBus, OrderStatus, PaymentStatus};

    use super::*;
    use crate::settlement::{SettlementConfig, SettlementDecider, SettlementPool};
    use crate::store::InMemoryPaymentStore;

    struct Approve;

    impl SettlementDecider for Approve {
        fn approve(&self, _payment: &Payment) -> bool {
            true
        }
    }

    fn setup(store: Arc<InMemoryPaymentStore>) -> (PaymentService<InMemoryPaymentStore>, SettlementPool, InMemoryEventBus) {
        let bus = InMemoryEventBus::new();
        let pool = SettlementPool::start(
            store.clone(),
            Arc::new(bus.clone()),
            "payment-events",
            Arc::new(Approve),
            SettlementConfig {
                delay: Duration::from_millis(1),
                workers: 2,
                queue_capacity: 8,
                max_retries: 1,
            },
        );
        let service = PaymentService::new(store, pool.queue(), 100.0);
        (service, pool, bus)
    }

    fn order_created(order_id: i64) -> SagaEvent {
        SagaEvent::new(
            EventType::OrderCreated,
            order_id.to_string(),
            &OrderEventPayload {
                order_id,
                user_id: 1,
                jar_id: "A".to_string(),
                quantity: 1,
                status: OrderStatus::Pending,
            },
        )
        .unwrap()
    }

    async fn wait_settled(service: &PaymentService<InMemoryPaymentStore>, order_id: i64) -> Payment {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let payment = service.get_payment_by_order(order_id).await.unwrap();
                if payment.status.is_terminal() {
                    return payment;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("payment should settle")
    }

    #[tokio::test]
    async fn test_create_payment_settles() {
        let (service, pool, _) = setup(Arc::new(InMemoryPaymentStore::new()));
        let payment = service
            .create_payment(CreatePaymentRequest {
                order_id: 1,
                amount: 25.0,
                payment_method: "paypal".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);

        let settled = wait_settled(&service, 1).await;
        assert_eq!(settled.status, PaymentStatus::Completed);
        assert_eq!(settled.payment_method, "paypal");
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_direct_payment_is_rejected() {
        let (service, pool, _) = setup(Arc::new(InMemoryPaymentStore::new()));
        let req = CreatePaymentRequest {
            order_id: 1,
            amount: 25.0,
            payment_method: "paypal".to_string(),
        };
        service.create_payment(req.clone()).await.unwrap();
        assert!(matches!(
            service.create_payment(req).await,
            Err(PaymentError::DuplicateOrder(1))
        ));
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_order_created_opens_mock_payment_once() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let (service, pool, bus) = setup(store.clone());
        let event = order_created(8);

        service.handle_order_event(&event).await.unwrap();
        service.handle_order_event(&event).await.unwrap();
        assert_eq!(store.payment_count().await, 1);

        let settled = wait_settled(&service, 8).await;
        assert_eq!(settled.amount, 100.0);
        assert_eq!(settled.payment_method, "credit_card");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.message_count("payment-events"), 1);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_other_order_events_are_ignored() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let (service, pool, _) = setup(store.clone());
        let mut event = order_created(8);
        event.event_type = EventType::OrderStatusUpdated.as_str().to_string();

        service.handle_order_event(&event).await.unwrap();
        assert_eq!(store.payment_count().await, 0);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_missing_payment_is_not_found() {
        let (service, pool, _) = setup(Arc::new(InMemoryPaymentStore::new()));
        assert!(matches!(
            service.get_payment(3).await,
            Err(PaymentError::NotFound(_))
        ));
        assert!(matches!(
            service.get_payment_by_order(3).await,
            Err(PaymentError::NotFound(_))
        ));
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_recover_pending_settles_leftovers() {
        let store = Arc::new(InMemoryPaymentStore::new());
        for order_id in [1, 2] {
            store
                .create(NewPayment {
                    order_id,
                    amount: 100.0,
                    payment_method: "credit_card".to_string(),
                })
                .await
                .unwrap();
        }

        let (service, pool, _) = setup(store.clone());
        assert_eq!(service.recover_pending().await.unwrap(), 2);
        wait_settled(&service, 1).await;
        wait_settled(&service, 2).await;
        pool.shutdown();
    }
}

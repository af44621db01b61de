//! In-process choreography harness.
//!
//! Wires the order, inventory and payment participants onto one
//! [`InMemoryEventBus`] the same way their binaries wire them onto a shared
//! broker: each participant publishes to its own topic and consumes the others
//! through its own consumer group. Nothing coordinates the saga; it advances
//! only through events.
//!
//! ```text
//! order.created ──► inventory (reserve)
//!               └─► payment (open + settle) ──► payment.completed | payment.failed
//!                                                     │
//! order.status_updated ◄── order (confirm | cancel) ◄─┘
//!        └─► inventory (release when cancelled)
//! ```

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use event_bus::{
    Consumer, ConsumerHandle, EventBus, INVENTORY_EVENTS_TOPIC, InMemoryEventBus,
    ORDER_EVENTS_TOPIC, PAYMENT_EVENTS_TOPIC, RetryPolicy,
};
use inventory_service::service::InventoryService;
use inventory_service::store::InMemoryInventoryStore;
use order_service::model::Order;
use order_service::service::OrderService;
use order_service::store::InMemoryOrderStore;
use payment_service::service::PaymentService;
use payment_service::settlement::{
    RandomDecider, SettlementConfig, SettlementDecider, SettlementPool,
};
use payment_service::store::InMemoryPaymentStore;

pub use error::{HarnessError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Knobs for a harness run.
pub struct HarnessConfig {
    pub decider: Arc<dyn SettlementDecider>,
    pub settlement: SettlementConfig,
    pub retry_policy: RetryPolicy,
    pub mock_amount: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            decider: Arc::new(RandomDecider::new(0.9)),
            settlement: SettlementConfig {
                delay: Duration::from_millis(10),
                ..SettlementConfig::default()
            },
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(50),
            },
            mock_amount: 100.0,
        }
    }
}

impl HarnessConfig {
    pub fn with_decider(mut self, decider: Arc<dyn SettlementDecider>) -> Self {
        self.decider = decider;
        self
    }
}

/// The three participants running against one bus.
pub struct SagaHarness {
    pub bus: InMemoryEventBus,
    pub orders: Arc<OrderService<InMemoryOrderStore>>,
    pub inventory: Arc<InventoryService<InMemoryInventoryStore>>,
    pub payments: Arc<PaymentService<InMemoryPaymentStore>>,
    consumers: Vec<ConsumerHandle>,
    settlement: SettlementPool,
}

impl SagaHarness {
    /// Builds the participants and starts their consumers and settlement workers.
    pub fn start(config: HarnessConfig) -> Self {
        let bus = InMemoryEventBus::new();
        let shared: Arc<dyn EventBus> = Arc::new(bus.clone());

        let orders = Arc::new(OrderService::new(
            InMemoryOrderStore::new(),
            shared.clone(),
            ORDER_EVENTS_TOPIC,
        ));
        let inventory = Arc::new(InventoryService::new(
            InMemoryInventoryStore::new(),
            shared.clone(),
            INVENTORY_EVENTS_TOPIC,
        ));

        let payment_store = Arc::new(InMemoryPaymentStore::new());
        let settlement = SettlementPool::start(
            payment_store.clone(),
            shared.clone(),
            PAYMENT_EVENTS_TOPIC,
            config.decider,
            config.settlement,
        );
        let payments = Arc::new(PaymentService::new(
            payment_store,
            settlement.queue(),
            config.mock_amount,
        ));

        let consumers = vec![
            Consumer::new(
                shared.clone(),
                PAYMENT_EVENTS_TOPIC,
                order_service::events::CONSUMER_GROUP,
                Arc::new(order_service::events::PaymentEventHandler::new(
                    orders.clone(),
                )),
            )
            .with_retry_policy(config.retry_policy.clone())
            .spawn(),
            Consumer::new(
                shared.clone(),
                ORDER_EVENTS_TOPIC,
                inventory_service::events::CONSUMER_GROUP,
                Arc::new(inventory_service::events::OrderEventHandler::new(
                    inventory.clone(),
                )),
            )
            .with_retry_policy(config.retry_policy.clone())
            .spawn(),
            Consumer::new(
                shared,
                ORDER_EVENTS_TOPIC,
                payment_service::events::CONSUMER_GROUP,
                Arc::new(payment_service::events::OrderEventHandler::new(
                    payments.clone(),
                )),
            )
            .with_retry_policy(config.retry_policy)
            .spawn(),
        ];

        tracing::info!("saga harness started");
        Self {
            bus,
            orders,
            inventory,
            payments,
            consumers,
            settlement,
        }
    }

    /// Waits until the order leaves `pending` and returns it.
    pub async fn wait_for_settled_order(&self, order_id: i64, timeout: Duration) -> Result<Order> {
        let orders = &self.orders;
        wait_until(format!("order {order_id} to settle"), timeout, move || async move {
            let order = orders.get_order(order_id).await?;
            Ok::<_, HarnessError>(order.status.is_terminal().then_some(order))
        })
        .await
    }

    /// Stops consumers and settlement workers.
    pub fn shutdown(&self) {
        for consumer in &self.consumers {
            consumer.abort();
        }
        self.settlement.shutdown();
    }
}

impl Drop for SagaHarness {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Polls `check` until it yields a value or `timeout` elapses.
pub async fn wait_until<T, F, Fut>(what: String, timeout: Duration, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let poll = async {
        loop {
            if let Some(value) = check().await? {
                return Ok::<T, HarnessError>(value);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| HarnessError::Timeout { what, timeout })?
}

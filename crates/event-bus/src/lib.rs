//! Event bus client for the order saga.
//!
//! Provides the saga event vocabulary, the [`EventBus`] abstraction with
//! in-memory, PostgreSQL and (behind the `kafka` feature) Kafka backends, and a
//! [`Consumer`] loop that retries failed handler attempts and dead-letters the
//! messages it cannot process.

pub mod bus;
pub mod consumer;
pub mod error;
pub mod event;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod message;
pub mod postgres;

use std::sync::Arc;

pub use bus::{EventBus, EventBusExt, Subscription};
pub use consumer::{
    Consumer, ConsumerHandle, EventHandler, HandlerError, RetryPolicy, dead_letter_topic,
    retry_topic,
};
pub use error::{BusError, Result};
pub use event::{
    EventType, INVENTORY_EVENTS_TOPIC, InventoryEventPayload, ORDER_EVENTS_TOPIC,
    OrderEventPayload, OrderStatus, PAYMENT_EVENTS_TOPIC, PaymentEventPayload, PaymentStatus,
    SagaEvent, UnknownEventType,
};
#[cfg(feature = "kafka")]
pub use kafka::KafkaEventBus;
pub use memory::InMemoryEventBus;
pub use message::{
    BusMessage, HEADER_EVENT_TYPE, HEADER_ORIGINAL_TOPIC, HEADER_RETRY_ATTEMPT,
    HEADER_RETRY_NOT_BEFORE, HEADER_RETRY_REASON, Headers,
};
pub use postgres::PostgresEventBus;

/// Connects to the bus named by `brokers`.
///
/// A single `postgres://` (or `postgresql://`) URL selects the PostgreSQL backend.
/// Anything else is treated as a Kafka bootstrap list, which needs the `kafka`
/// feature.
pub async fn connect(brokers: &[String]) -> Result<Arc<dyn EventBus>> {
    if let [url] = brokers
        && (url.starts_with("postgres://") || url.starts_with("postgresql://"))
    {
        let bus = PostgresEventBus::connect(url).await?;
        tracing::info!("connected to postgres event bus");
        return Ok(Arc::new(bus));
    }

    #[cfg(feature = "kafka")]
    {
        let bus = KafkaEventBus::new(brokers)?;
        tracing::info!(brokers = %brokers.join(","), "connected to kafka event bus");
        Ok(Arc::new(bus))
    }

    #[cfg(not(feature = "kafka"))]
    {
        Err(BusError::Unsupported(brokers.join(",")))
    }
}

use async_trait::async_trait;

use crate::event::SagaEvent;
use crate::message::{BusMessage, HEADER_EVENT_TYPE, Headers};
use crate::Result;

/// Core trait for event bus backends.
///
/// Delivery is at-least-once: a message read from a [`Subscription`] and not
/// acknowledged is handed out again, possibly to another member of the same
/// consumer group. Ordering holds per topic and key only.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends an already-encoded message to `topic`.
    async fn publish_raw(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<()>;

    /// Joins `group` on `topic`. Each message is delivered to one subscription per group.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>>;
}

/// A blocking pull over one topic for one consumer group member.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message. Blocks indefinitely while the topic is idle.
    async fn next(&mut self) -> Result<BusMessage>;

    /// Marks `message` as processed so it is not redelivered to the group.
    async fn ack(&mut self, message: &BusMessage) -> Result<()>;
}

/// Extension trait providing typed publishing for event buses.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Publishes a saga event as JSON with the `event-type` header set.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &SagaEvent,
        mut headers: Headers,
    ) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        headers.insert(HEADER_EVENT_TYPE.to_string(), event.event_type.clone());
        self.publish_raw(topic, key, payload, headers).await
    }
}

// Blanket implementation for all EventBus implementations
impl<T: EventBus + ?Sized> EventBusExt for T {}

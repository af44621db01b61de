//! Consumer loop with retry and dead-letter routing.
//!
//! A [`Consumer`] runs two sequential loops for one handler: one over the source
//! topic, one over its retry topic `{topic}.{group}.retry`. A handler failure is
//! never dropped: the message is republished to the retry topic with backoff
//! metadata, and after the attempt cap (or immediately, for malformed bodies and
//! non-retryable errors) it lands on `{topic}.{group}.dlq`.
//!
//! Per-key order holds on the source topic only. A retried message is handled
//! after later messages with the same key, so handlers must tolerate seeing a
//! key's events out of order.
//!
//! The retry loop is FIFO: it sleeps in place until the head message is due,
//! so a long backoff delays retries queued behind it. The sleep is capped at
//! the policy's `max_backoff`, which bounds that head-of-line delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    BusMessage, EventBus, HEADER_ORIGINAL_TOPIC, HEADER_RETRY_ATTEMPT, HEADER_RETRY_NOT_BEFORE,
    HEADER_RETRY_REASON, Result, SagaEvent,
};

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// A failed attempt to handle an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    retryable: bool,
}

impl HandlerError {
    /// A failure that may succeed on a later attempt (store unavailable, lock timeout).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not change on retry (unknown type, bad payload, business rule).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Reacts to saga events delivered by a [`Consumer`].
///
/// Delivery is at-least-once, so implementations must tolerate duplicates.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &SagaEvent) -> std::result::Result<(), HandlerError>;
}

/// Retry schedule for failed handler attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total handler attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Name of the retry topic for `topic` consumed by `group`.
pub fn retry_topic(topic: &str, group: &str) -> String {
    format!("{topic}.{group}.retry")
}

/// Name of the dead-letter topic for `topic` consumed by `group`.
pub fn dead_letter_topic(topic: &str, group: &str) -> String {
    format!("{topic}.{group}.dlq")
}

/// A consumer group member feeding one topic into an [`EventHandler`].
pub struct Consumer<H> {
    bus: Arc<dyn EventBus>,
    topic: String,
    group: String,
    handler: Arc<H>,
    policy: RetryPolicy,
}

/// Join handles of a spawned consumer's loops.
pub struct ConsumerHandle {
    main: JoinHandle<()>,
    retry: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stops both loops. Unacknowledged messages are redelivered later.
    pub fn abort(&self) {
        self.main.abort();
        self.retry.abort();
    }
}

impl<H: EventHandler + 'static> Consumer<H> {
    pub fn new(
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<H>,
    ) -> Self {
        Self {
            bus,
            topic: topic.into(),
            group: group.into(),
            handler,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Spawns the source loop and the retry loop.
    pub fn spawn(self) -> ConsumerHandle {
        let consumer = Arc::new(self);
        let retry_source = retry_topic(&consumer.topic, &consumer.group);

        let main = {
            let consumer = consumer.clone();
            let source = consumer.topic.clone();
            tokio::spawn(async move { consumer.run(source).await })
        };
        let retry = tokio::spawn(async move { consumer.run(retry_source).await });

        ConsumerHandle { main, retry }
    }

    /// Consumes `source` forever, one message at a time.
    async fn run(&self, source: String) {
        tracing::info!(topic = %source, group = %self.group, "consumer started");
        loop {
            let mut subscription = match self.bus.subscribe(&source, &self.group).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::error!(topic = %source, group = %self.group, error = %e, "subscribe failed");
                    tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                    continue;
                }
            };

            loop {
                let message = match subscription.next().await {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!(topic = %source, group = %self.group, error = %e, "read failed");
                        break;
                    }
                };

                // Only acknowledge once the message is handled or safely forwarded.
                if let Err(e) = self.process(&message).await {
                    tracing::error!(
                        topic = %source,
                        group = %self.group,
                        key = %message.key,
                        error = %e,
                        "could not forward failed message, leaving it for redelivery"
                    );
                    break;
                }
                if let Err(e) = subscription.ack(&message).await {
                    tracing::warn!(topic = %source, group = %self.group, error = %e, "ack failed");
                }
            }

            drop(subscription);
            tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
        }
    }

    /// Handles one message. Errors only when a failed message could not be forwarded.
    async fn process(&self, message: &BusMessage) -> Result<()> {
        metrics::counter!(
            "bus_events_consumed_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);

        let attempt: u32 = message
            .header(HEADER_RETRY_ATTEMPT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if let Some(not_before) = message
            .header(HEADER_RETRY_NOT_BEFORE)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        {
            let wait = (not_before.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or_default()
                .min(self.policy.max_backoff);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    group = %self.group,
                    key = %message.key,
                    error = %e,
                    "malformed event skipped"
                );
                return self
                    .dead_letter(message, &format!("malformed event: {e}"), attempt)
                    .await;
            }
        };

        let result = self.handler.handle(&event).await;
        let Err(err) = result else {
            return Ok(());
        };

        let next_attempt = attempt + 1;
        if err.is_retryable() && next_attempt < self.policy.max_attempts {
            tracing::warn!(
                event_type = %event.event_type,
                correlation_id = %event.correlation_id,
                attempt = next_attempt,
                error = %err,
                "event handler failed, scheduling retry"
            );
            self.schedule_retry(message, next_attempt, err.message())
                .await
        } else {
            tracing::error!(
                event_type = %event.event_type,
                correlation_id = %event.correlation_id,
                attempts = next_attempt,
                retryable = err.is_retryable(),
                error = %err,
                "event handler failed, dead-lettering"
            );
            self.dead_letter(message, err.message(), next_attempt).await
        }
    }

    async fn schedule_retry(&self, message: &BusMessage, attempt: u32, reason: &str) -> Result<()> {
        let not_before = Utc::now()
            + chrono::Duration::from_std(self.policy.backoff_for(attempt)).unwrap_or_default();

        let mut headers = message.headers.clone();
        headers
            .entry(HEADER_ORIGINAL_TOPIC.to_string())
            .or_insert_with(|| message.topic.clone());
        headers.insert(HEADER_RETRY_ATTEMPT.to_string(), attempt.to_string());
        headers.insert(HEADER_RETRY_NOT_BEFORE.to_string(), not_before.to_rfc3339());
        headers.insert(HEADER_RETRY_REASON.to_string(), reason.to_string());

        metrics::counter!(
            "bus_events_retried_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);

        self.bus
            .publish_raw(
                &retry_topic(&self.topic, &self.group),
                &message.key,
                message.payload.clone(),
                headers,
            )
            .await
    }

    async fn dead_letter(&self, message: &BusMessage, reason: &str, attempts: u32) -> Result<()> {
        let mut headers = message.headers.clone();
        headers
            .entry(HEADER_ORIGINAL_TOPIC.to_string())
            .or_insert_with(|| message.topic.clone());
        headers.insert(HEADER_RETRY_ATTEMPT.to_string(), attempts.to_string());
        headers.insert(HEADER_RETRY_REASON.to_string(), reason.to_string());
        headers.remove(HEADER_RETRY_NOT_BEFORE);

        metrics::counter!(
            "bus_events_dead_lettered_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);

        self.bus
            .publish_raw(
                &dead_letter_topic(&self.topic, &self.group),
                &message.key,
                message.payload.clone(),
                headers,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{EventBusExt, EventType, Headers, InMemoryEventBus};

    /// Records every event; fails the first `failures` attempts per correlation id.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        failures: u32,
        retryable: bool,
    }

    impl RecordingHandler {
        fn failing(failures: u32, retryable: bool) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                failures,
                retryable,
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &SagaEvent) -> std::result::Result<(), HandlerError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(event.correlation_id.clone());
            let attempts = seen.iter().filter(|c| **c == event.correlation_id).count() as u32;
            if attempts <= self.failures {
                return Err(if self.retryable {
                    HandlerError::retryable("store unavailable")
                } else {
                    HandlerError::permanent("unknown event type")
                });
            }
            Ok(())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    async fn publish(bus: &InMemoryEventBus, correlation_id: &str) {
        let event = SagaEvent::new(
            EventType::PaymentCompleted,
            correlation_id,
            &serde_json::json!({}),
        )
        .unwrap();
        bus.publish("payments", correlation_id, &event, Headers::new())
            .await
            .unwrap();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(1));
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(
            retry_topic("order-events", "payment-service-group"),
            "order-events.payment-service-group.retry"
        );
        assert_eq!(
            dead_letter_topic("order-events", "payment-service-group"),
            "order-events.payment-service-group.dlq"
        );
    }

    #[tokio::test]
    async fn malformed_event_is_skipped_and_later_events_processed() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(RecordingHandler::default());
        let handle = Consumer::new(Arc::new(bus.clone()), "payments", "orders", handler.clone())
            .with_retry_policy(fast_policy(3))
            .spawn();

        bus.publish_raw("payments", "x", b"{not json".to_vec(), Headers::new())
            .await
            .unwrap();
        publish(&bus, "42").await;

        wait_until(|| handler.seen() == vec!["42".to_string()]).await;
        wait_until(|| bus.message_count("payments.orders.dlq") == 1).await;

        let dead = &bus.messages("payments.orders.dlq")[0];
        assert_eq!(dead.payload, b"{not json".to_vec());
        assert_eq!(dead.header(HEADER_ORIGINAL_TOPIC), Some("payments"));
        assert!(dead.header(HEADER_RETRY_REASON).unwrap().starts_with("malformed"));
        handle.abort();
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_until_success() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(RecordingHandler::failing(2, true));
        let handle = Consumer::new(Arc::new(bus.clone()), "payments", "orders", handler.clone())
            .with_retry_policy(fast_policy(5))
            .spawn();

        publish(&bus, "7").await;

        wait_until(|| handler.seen().len() == 3).await;
        assert_eq!(bus.message_count("payments.orders.retry"), 2);
        assert_eq!(bus.message_count("payments.orders.dlq"), 0);

        let retries = bus.messages("payments.orders.retry");
        assert_eq!(retries[0].header(HEADER_RETRY_ATTEMPT), Some("1"));
        assert_eq!(retries[1].header(HEADER_RETRY_ATTEMPT), Some("2"));
        assert_eq!(retries[1].header(HEADER_ORIGINAL_TOPIC), Some("payments"));
        handle.abort();
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(RecordingHandler::failing(u32::MAX, true));
        let handle = Consumer::new(Arc::new(bus.clone()), "payments", "orders", handler.clone())
            .with_retry_policy(fast_policy(3))
            .spawn();

        publish(&bus, "9").await;

        wait_until(|| bus.message_count("payments.orders.dlq") == 1).await;
        assert_eq!(handler.seen().len(), 3);
        assert_eq!(bus.message_count("payments.orders.retry"), 2);
        let dead = &bus.messages("payments.orders.dlq")[0];
        assert_eq!(dead.header(HEADER_RETRY_ATTEMPT), Some("3"));
        assert_eq!(dead.header(HEADER_RETRY_REASON), Some("store unavailable"));
        handle.abort();
    }

    #[tokio::test]
    async fn retry_wait_is_capped_by_max_backoff() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(RecordingHandler::default());
        let handle = Consumer::new(Arc::new(bus.clone()), "payments", "orders", handler.clone())
            .with_retry_policy(fast_policy(5))
            .spawn();

        let event = SagaEvent::new(EventType::PaymentCompleted, "11", &serde_json::json!({})).unwrap();
        let not_before = Utc::now() + chrono::Duration::hours(1);
        let headers = Headers::from([
            (HEADER_RETRY_ATTEMPT.to_string(), "1".to_string()),
            (HEADER_RETRY_NOT_BEFORE.to_string(), not_before.to_rfc3339()),
            (HEADER_ORIGINAL_TOPIC.to_string(), "payments".to_string()),
        ]);
        bus.publish("payments.orders.retry", "11", &event, headers)
            .await
            .unwrap();

        wait_until(|| handler.seen() == vec!["11".to_string()]).await;
        handle.abort();
    }

    #[tokio::test]
    async fn permanent_failure_skips_retry() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(RecordingHandler::failing(u32::MAX, false));
        let handle = Consumer::new(Arc::new(bus.clone()), "payments", "orders", handler.clone())
            .with_retry_policy(fast_policy(5))
            .spawn();

        publish(&bus, "5").await;
        publish(&bus, "6").await;

        wait_until(|| bus.message_count("payments.orders.dlq") == 2).await;
        assert_eq!(bus.message_count("payments.orders.retry"), 0);
        assert_eq!(handler.seen(), vec!["5".to_string(), "6".to_string()]);
        handle.abort();
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    BusError, BusMessage, Headers, Result, SagaEvent,
    bus::{EventBus, Subscription},
};

#[derive(Debug, Default)]
struct GroupCursor {
    next_offset: usize,
    /// Offsets handed out but dropped without acknowledgement.
    redeliver: VecDeque<usize>,
}

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<BusMessage>,
    groups: HashMap<String, GroupCursor>,
}

#[derive(Debug, Default)]
struct InMemoryBusState {
    topics: HashMap<String, TopicLog>,
    fail_on_publish: bool,
}

/// In-memory event bus for tests and single-process deployments.
///
/// Each topic is an append-only log; each consumer group keeps its own cursor.
/// Messages held by a subscription that is dropped before acknowledging them go
/// back to the group and are delivered again.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<InMemoryBusState>>,
    notify: Arc<Notify>,
}

impl InMemoryEventBus {
    /// Creates a new empty in-memory bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryBusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Configures the bus to reject publishes.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.lock().fail_on_publish = fail;
    }

    /// Returns every message published to `topic`, in order.
    pub fn messages(&self, topic: &str) -> Vec<BusMessage> {
        self.lock()
            .topics
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Returns the decodable saga events published to `topic`, in order.
    pub fn events(&self, topic: &str) -> Vec<SagaEvent> {
        self.messages(topic)
            .iter()
            .filter_map(|m| m.decode().ok())
            .collect()
    }

    /// Returns the number of messages published to `topic`.
    pub fn message_count(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map_or(0, |log| log.messages.len())
    }

    fn take_next(&self, topic: &str, group: &str) -> Option<BusMessage> {
        let mut state = self.lock();
        let log = state.topics.entry(topic.to_string()).or_default();
        let cursor = log.groups.entry(group.to_string()).or_default();

        let offset = match cursor.redeliver.pop_front() {
            Some(offset) => offset,
            None if cursor.next_offset < log.messages.len() => {
                cursor.next_offset += 1;
                cursor.next_offset - 1
            }
            None => return None,
        };
        log.messages.get(offset).cloned()
    }

    fn return_unacked(&self, topic: &str, group: &str, mut offsets: Vec<usize>) {
        if offsets.is_empty() {
            return;
        }
        offsets.sort_unstable();
        {
            let mut state = self.lock();
            let log = state.topics.entry(topic.to_string()).or_default();
            let cursor = log.groups.entry(group.to_string()).or_default();
            for offset in offsets.into_iter().rev() {
                cursor.redeliver.push_front(offset);
            }
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish_raw(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<()> {
        {
            let mut state = self.lock();
            if state.fail_on_publish {
                return Err(BusError::Publish {
                    topic: topic.to_string(),
                    reason: "bus unavailable".to_string(),
                });
            }

            let log = state.topics.entry(topic.to_string()).or_default();
            let offset = log.messages.len() as i64;
            log.messages.push(BusMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                headers,
                payload,
                offset,
                partition: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        {
            let mut state = self.lock();
            let log = state.topics.entry(topic.to_string()).or_default();
            log.groups.entry(group.to_string()).or_default();
        }
        Ok(Box::new(InMemorySubscription {
            bus: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            in_flight: Vec::new(),
        }))
    }
}

struct InMemorySubscription {
    bus: InMemoryEventBus,
    topic: String,
    group: String,
    in_flight: Vec<usize>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<BusMessage> {
        loop {
            // Register interest before checking so a publish in between is not missed.
            let notified = self.bus.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.bus.take_next(&self.topic, &self.group) {
                self.in_flight.push(message.offset as usize);
                return Ok(message);
            }

            notified.await;
        }
    }

    async fn ack(&mut self, message: &BusMessage) -> Result<()> {
        let offset = message.offset as usize;
        self.in_flight.retain(|o| *o != offset);
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        let offsets = std::mem::take(&mut self.in_flight);
        self.bus.return_unacked(&self.topic, &self.group, offsets);
    }
}

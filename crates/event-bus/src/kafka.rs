//! Kafka backend, enabled with the `kafka` feature.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};

use crate::{
    BusError, BusMessage, Headers, Result,
    bus::{EventBus, Subscription},
};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-backed event bus. Keys map to Kafka message keys, so per-key ordering
/// follows partition ordering.
#[derive(Clone)]
pub struct KafkaEventBus {
    brokers: String,
    producer: FutureProducer,
}

impl KafkaEventBus {
    pub fn new(brokers: &[String]) -> Result<Self> {
        let brokers = brokers.join(",");
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("acks", "1")
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self { brokers, producer })
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish_raw(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<()> {
        let mut kafka_headers = OwnedHeaders::new();
        for (name, value) in &headers {
            kafka_headers = kafka_headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(&payload)
            .headers(kafka_headers);

        self.producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
            .map_err(|(e, _)| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[topic])?;

        Ok(Box::new(KafkaSubscription { consumer }))
    }
}

struct KafkaSubscription {
    consumer: StreamConsumer,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self) -> Result<BusMessage> {
        let message = self.consumer.recv().await?;

        let mut headers = Headers::new();
        if let Some(kafka_headers) = message.headers() {
            for header in kafka_headers.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        Ok(BusMessage {
            topic: message.topic().to_string(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default(),
            headers,
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            offset: message.offset(),
            partition: message.partition(),
        })
    }

    async fn ack(&mut self, message: &BusMessage) -> Result<()> {
        let mut positions = TopicPartitionList::new();
        positions.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&positions, CommitMode::Async)?;
        Ok(())
    }
}

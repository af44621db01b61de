use std::collections::BTreeMap;

use crate::event::SagaEvent;

/// Header carrying the saga event type string.
pub const HEADER_EVENT_TYPE: &str = "event-type";

/// Number of handler attempts already made for a redelivered message.
pub const HEADER_RETRY_ATTEMPT: &str = "retry-attempt";

/// RFC 3339 timestamp before which a retried message must not be handled.
pub const HEADER_RETRY_NOT_BEFORE: &str = "retry-not-before";

/// Error text of the last failed attempt.
pub const HEADER_RETRY_REASON: &str = "retry-reason";

/// Topic the message was first published to.
pub const HEADER_ORIGINAL_TOPIC: &str = "original-topic";

/// Message headers. Ordered so serialized forms are stable.
pub type Headers = BTreeMap<String, String>;

/// A message read from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub key: String,
    pub headers: Headers,
    pub payload: Vec<u8>,
    /// Backend-specific position used for acknowledgement.
    pub offset: i64,
    pub partition: i32,
}

impl BusMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header(HEADER_EVENT_TYPE)
    }

    /// Decodes the JSON body as a saga event.
    pub fn decode(&self) -> Result<SagaEvent, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

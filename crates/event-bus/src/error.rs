use thiserror::Error;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus rejected or could not persist a message.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The subscription has been closed and will not yield more messages.
    #[error("subscription to {topic} closed")]
    Closed { topic: String },

    /// The broker endpoint is not supported by this build.
    #[error("unsupported bus endpoint: {0}")]
    Unsupported(String),

    /// A database error occurred (Postgres backend).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A Kafka client error occurred.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

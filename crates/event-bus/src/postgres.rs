use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    BusError, BusMessage, Headers, Result,
    bus::{EventBus, Subscription},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// PostgreSQL-backed event bus.
///
/// Topics are rows in `bus_messages`, ordered by id. Publishes to one topic are
/// serialized with a transaction-scoped advisory lock, so ids commit in order and
/// a consumer never skips a late-committing row. A delivery holds a row lock on the
/// group's entry in `bus_consumer_offsets` until it is acknowledged: other members
/// of the group wait, and a consumer that dies mid-delivery rolls back and the
/// message is handed out again.
#[derive(Clone)]
pub struct PostgresEventBus {
    pool: PgPool,
    poll_interval: Duration,
}

impl PostgresEventBus {
    /// Creates a new Postgres event bus over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Connects to `url` and applies the bus migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        let bus = Self::new(pool);
        bus.run_migrations().await?;
        Ok(bus)
    }

    /// Sets how long an idle subscription sleeps between polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the bus migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await
    }

    fn row_to_message(row: PgRow) -> Result<BusMessage> {
        let headers_json: serde_json::Value = row.try_get("headers")?;
        let headers: Headers = serde_json::from_value(headers_json)?;

        Ok(BusMessage {
            topic: row.try_get("topic")?,
            key: row.try_get("message_key")?,
            headers,
            payload: row.try_get("payload")?,
            offset: row.try_get("id")?,
            partition: 0,
        })
    }
}

#[async_trait]
impl EventBus for PostgresEventBus {
    async fn publish_raw(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<()> {
        let headers_json = serde_json::to_value(&headers)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(topic)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO bus_messages (topic, message_key, headers, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(topic)
        .bind(key)
        .bind(headers_json)
        .bind(payload)
        .execute(&mut *tx)
        .await
        .map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        tx.commit().await?;

        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        sqlx::query(
            r#"
            INSERT INTO bus_consumer_offsets (topic, group_name, committed_id)
            VALUES ($1, $2, 0)
            ON CONFLICT (topic, group_name) DO NOTHING
            "#,
        )
        .bind(topic)
        .bind(group)
        .execute(&self.pool)
        .await?;

        Ok(Box::new(PostgresSubscription {
            pool: self.pool.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            poll_interval: self.poll_interval,
            pending: None,
        }))
    }
}

struct PostgresSubscription {
    pool: PgPool,
    topic: String,
    group: String,
    poll_interval: Duration,
    /// Open transaction holding the group lock for the unacknowledged message.
    pending: Option<(Transaction<'static, Postgres>, i64)>,
}

#[async_trait]
impl Subscription for PostgresSubscription {
    async fn next(&mut self) -> Result<BusMessage> {
        // An unacknowledged delivery is given up and will be handed out again.
        if let Some((tx, _)) = self.pending.take() {
            tx.rollback().await?;
        }

        loop {
            let mut tx = self.pool.begin().await?;

            let committed: i64 = sqlx::query_scalar(
                r#"
                SELECT committed_id FROM bus_consumer_offsets
                WHERE topic = $1 AND group_name = $2
                FOR UPDATE
                "#,
            )
            .bind(&self.topic)
            .bind(&self.group)
            .fetch_one(&mut *tx)
            .await?;

            let row: Option<PgRow> = sqlx::query(
                r#"
                SELECT id, topic, message_key, headers, payload
                FROM bus_messages
                WHERE topic = $1 AND id > $2
                ORDER BY id ASC
                LIMIT 1
                "#,
            )
            .bind(&self.topic)
            .bind(committed)
            .fetch_optional(&mut *tx)
            .await?;

            match row {
                Some(row) => {
                    let message = PostgresEventBus::row_to_message(row)?;
                    self.pending = Some((tx, message.offset));
                    return Ok(message);
                }
                None => {
                    tx.rollback().await?;
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn ack(&mut self, message: &BusMessage) -> Result<()> {
        let Some((mut tx, offset)) = self.pending.take() else {
            return Ok(());
        };
        if offset != message.offset {
            tracing::warn!(
                topic = %self.topic,
                expected = offset,
                got = message.offset,
                "ack for a message that is not the pending delivery"
            );
            self.pending = Some((tx, offset));
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE bus_consumer_offsets SET committed_id = $3
            WHERE topic = $1 AND group_name = $2
            "#,
        )
        .bind(&self.topic)
        .bind(&self.group)
        .bind(offset)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }
}

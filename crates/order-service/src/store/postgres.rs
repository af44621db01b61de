use async_trait::async_trait;
use event_bus::OrderStatus;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{OrderStore, Result};
use crate::model::{NewOrder, Order};

const ORDER_COLUMNS: &str =
    "id, user_id, jar_id, quantity, total_price, status, created_at, updated_at";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the order migrations. Tables of other services in a shared database are left alone.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status: OrderStatus = status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;

        Ok(Order {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            jar_id: row.try_get("jar_id")?,
            quantity: row.try_get("quantity")?,
            total_price: row.try_get("total_price")?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (user_id, jar_id, quantity, total_price, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.user_id)
        .bind(&order.jar_id)
        .bind(order.quantity)
        .bind(order.total_price)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_order(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn transition_from_pending(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }
}

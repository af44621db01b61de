use async_trait::async_trait;
use event_bus::PaymentStatus;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{PaymentStore, Result};
use crate::error::PaymentError;
use crate::model::{NewPayment, Payment};

const PAYMENT_COLUMNS: &str =
    "id, order_id, amount, payment_method, status, transaction_id, created_at, updated_at";

/// PostgreSQL-backed payment store.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Creates a new PostgreSQL payment store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the payment migrations. Tables of other services in a shared database are left alone.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let status: PaymentStatus = status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;

        Ok(Payment {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            amount: row.try_get("amount")?,
            payment_method: row.try_get("payment_method")?,
            status,
            transaction_id: row.try_get("transaction_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn create(&self, payment: NewPayment) -> Result<Payment> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments (order_id, amount, payment_method, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (order_id) DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(&payment.payment_method)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_payment(row),
            None => Err(PaymentError::DuplicateOrder(payment.order_id)),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn get_by_order(&self, order_id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn settle(
        &self,
        id: i64,
        status: PaymentStatus,
        transaction_id: &str,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET status = $2, transaction_id = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE status = 'pending' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }
}

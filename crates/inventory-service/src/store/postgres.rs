use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use super::{InventoryStore, Result};
use crate::error::InventoryError;
use crate::model::{Inventory, Reservation, ReservationStatus};

const INVENTORY_COLUMNS: &str = "jar_id, quantity, reserved, created_at, updated_at";

/// PostgreSQL-backed inventory store.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the inventory migrations. Tables of other services in a shared database are left alone.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await
    }

    fn row_to_inventory(row: PgRow) -> Result<Inventory> {
        Ok(Inventory {
            jar_id: row.try_get("jar_id")?,
            quantity: row.try_get("quantity")?,
            reserved: row.try_get("reserved")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Maps Postgres' `numeric_value_out_of_range` to [`InventoryError::Overflow`].
fn out_of_range(err: sqlx::Error, jar_id: &str) -> InventoryError {
    let overflowed = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "22003");
    if overflowed {
        return InventoryError::Overflow(jar_id.to_string());
    }
    err.into()
}

/// Flips an active ledger entry to `released`, returning its jar and quantity.
async fn mark_released(conn: &mut PgConnection, order_id: i64) -> Result<Option<PgRow>> {
    Ok(sqlx::query(
        r#"
        UPDATE inventory_reservations SET status = 'released', updated_at = NOW()
        WHERE order_id = $1 AND status = 'reserved'
        RETURNING jar_id, quantity
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Conditional `quantity -> reserved` move on one row.
async fn take(conn: &mut PgConnection, jar_id: &str, quantity: i32) -> Result<Inventory> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE inventory
        SET quantity = quantity - $2, reserved = reserved + $2, updated_at = NOW()
        WHERE jar_id = $1 AND quantity >= $2
        RETURNING {INVENTORY_COLUMNS}
        "#
    ))
    .bind(jar_id)
    .bind(quantity)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| out_of_range(e, jar_id))?;

    if let Some(row) = row {
        return PostgresInventoryStore::row_to_inventory(row);
    }

    let available: Option<i32> = sqlx::query_scalar("SELECT quantity FROM inventory WHERE jar_id = $1")
        .bind(jar_id)
        .fetch_optional(&mut *conn)
        .await?;
    match available {
        Some(available) => Err(InventoryError::InsufficientStock {
            jar_id: jar_id.to_string(),
            requested: quantity,
            available,
        }),
        None => Err(InventoryError::NotFound(jar_id.to_string())),
    }
}

/// Conditional `reserved -> quantity` move on one row.
async fn give_back(conn: &mut PgConnection, jar_id: &str, quantity: i32) -> Result<Inventory> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE inventory
        SET quantity = quantity + $2, reserved = reserved - $2, updated_at = NOW()
        WHERE jar_id = $1 AND reserved >= $2
        RETURNING {INVENTORY_COLUMNS}
        "#
    ))
    .bind(jar_id)
    .bind(quantity)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| out_of_range(e, jar_id))?;

    if let Some(row) = row {
        return PostgresInventoryStore::row_to_inventory(row);
    }

    let reserved: Option<i32> = sqlx::query_scalar("SELECT reserved FROM inventory WHERE jar_id = $1")
        .bind(jar_id)
        .fetch_optional(&mut *conn)
        .await?;
    match reserved {
        Some(reserved) => Err(InventoryError::InsufficientReserved {
            jar_id: jar_id.to_string(),
            requested: quantity,
            reserved,
        }),
        None => Err(InventoryError::NotFound(jar_id.to_string())),
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn create(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO inventory (jar_id, quantity, reserved)
            VALUES ($1, $2, 0)
            ON CONFLICT (jar_id) DO NOTHING
            RETURNING {INVENTORY_COLUMNS}
            "#
        ))
        .bind(jar_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_inventory(row),
            None => Err(InventoryError::AlreadyExists(jar_id.to_string())),
        }
    }

    async fn get(&self, jar_id: &str) -> Result<Option<Inventory>> {
        let row = sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE jar_id = $1"
        ))
        .bind(jar_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_inventory).transpose()
    }

    async fn set_quantity(&self, jar_id: &str, quantity: i32) -> Result<Option<Inventory>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory SET quantity = $2, updated_at = NOW()
            WHERE jar_id = $1
            RETURNING {INVENTORY_COLUMNS}
            "#
        ))
        .bind(jar_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_inventory).transpose()
    }

    async fn reserve(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let mut conn = self.pool.acquire().await?;
        take(&mut *conn, jar_id, quantity).await
    }

    async fn release(&self, jar_id: &str, quantity: i32) -> Result<Inventory> {
        let mut conn = self.pool.acquire().await?;
        give_back(&mut *conn, jar_id, quantity).await
    }

    async fn reserve_for_order(
        &self,
        order_id: i64,
        jar_id: &str,
        quantity: i32,
    ) -> Result<Option<Inventory>> {
        let mut tx = self.pool.begin().await?;

        // A concurrent delivery of the same order waits here until we commit.
        let inserted = sqlx::query(
            r#"
            INSERT INTO inventory_reservations (order_id, jar_id, quantity, status)
            SELECT $1, $2, $3, 'reserved'
            WHERE EXISTS (SELECT 1 FROM inventory WHERE jar_id = $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(jar_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT order_id FROM inventory_reservations WHERE order_id = $1")
                    .bind(order_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match exists {
                Some(_) => Ok(None),
                None => Err(InventoryError::NotFound(jar_id.to_string())),
            };
        }

        // Dropping the transaction on error rolls back the ledger insert.
        let item = take(&mut *tx, jar_id, quantity).await?;
        tx.commit().await?;
        Ok(Some(item))
    }

    async fn release_for_order(&self, order_id: i64, jar_id: &str) -> Result<Option<Inventory>> {
        let mut tx = self.pool.begin().await?;

        let mut row = mark_released(&mut *tx, order_id).await?;
        if row.is_none() {
            let tombstoned = sqlx::query(
                r#"
                INSERT INTO inventory_reservations (order_id, jar_id, quantity, status)
                VALUES ($1, $2, 0, 'cancelled')
                ON CONFLICT (order_id) DO NOTHING
                "#,
            )
            .bind(order_id)
            .bind(jar_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            // Lost the race to a concurrent reservation that has now committed.
            if tombstoned == 0 {
                row = mark_released(&mut *tx, order_id).await?;
            }
        }

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let jar_id: String = row.try_get("jar_id")?;
        let quantity: i32 = row.try_get("quantity")?;

        let item = give_back(&mut *tx, &jar_id, quantity).await?;
        tx.commit().await?;
        Ok(Some(item))
    }

    async fn reservation(&self, order_id: i64) -> Result<Option<Reservation>> {
        let row = sqlx::query(
            "SELECT order_id, jar_id, quantity, status FROM inventory_reservations WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        let status: ReservationStatus = status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;

        Ok(Some(Reservation {
            order_id: row.try_get("order_id")?,
            jar_id: row.try_get("jar_id")?,
            quantity: row.try_get("quantity")?,
            status,
        }))
    }
}

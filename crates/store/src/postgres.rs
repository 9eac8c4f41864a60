use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use common::{OrderId, Version};
use domain::{CustomerId, Order, OrderLine, ProductId, RefundId, RefundRecord};

use crate::{
    Result, StoreError,
    repository::{OrderRepository, RefundLedger, StockLedger},
};

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let body: serde_json::Value = row.try_get("body")?;
    let mut order: Order = serde_json::from_value(body)?;
    // The version column is authoritative.
    order.set_version(Version::new(row.try_get("version")?));
    Ok(order)
}

/// PostgreSQL-backed order repository.
///
/// Orders are persisted as JSONB documents with the columns the queries
/// need extracted alongside; the version column drives optimistic
/// concurrency control.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL order repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Version> {
        let version = Version::first();
        let mut stored = order.clone();
        stored.set_version(version);
        let body = serde_json::to_value(&stored)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, order_state, delivery_state, payment_method,
                                payment_status, version, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.customer_id().as_uuid())
        .bind(order.order_state().as_str())
        .bind(order.delivery_state().as_str())
        .bind(order.payment().method.as_str())
        .bind(order.payment().status.as_str())
        .bind(version.as_i64())
        .bind(body)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(version)
    }

    async fn update(&self, order: &Order) -> Result<Version> {
        let next = order.version().next();
        let mut stored = order.clone();
        stored.set_version(next);
        let body = serde_json::to_value(&stored)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET order_state = $2, delivery_state = $3, payment_status = $4,
                version = $5, body = $6, updated_at = $7
            WHERE id = $1 AND version = $8
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.order_state().as_str())
        .bind(order.delivery_state().as_str())
        .bind(order.payment().status.as_str())
        .bind(next.as_i64())
        .bind(body)
        .bind(order.updated_at())
        .bind(order.version().as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the row is gone or another writer moved the version.
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                    .bind(order.id().as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            return match actual {
                Some(actual) => Err(StoreError::VersionConflict {
                    order_id: order.id(),
                    expected: order.version(),
                    actual: Version::new(actual),
                }),
                None => Err(StoreError::OrderNotFound(order.id())),
            };
        }

        Ok(next)
    }

    async fn get(&self, id: OrderId) -> Result<Order> {
        self.find(id).await?.ok_or(StoreError::OrderNotFound(id))
    }

    async fn find(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT body, version FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn delete(&self, id: OrderId) -> Result<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(id));
        }
        Ok(())
    }

    async fn list_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT body, version FROM orders
            WHERE customer_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn find_unverified_bank_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT body, version FROM orders
            WHERE payment_method = 'BANK'
              AND payment_status = 'PENDING'
              AND order_state NOT IN ('DELIVERED', 'CANCELLED', 'RETURNED')
              AND created_at < $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }
}

/// PostgreSQL-backed stock ledger.
///
/// Reservation uses a guarded UPDATE inside a transaction so a multi-line
/// reservation either deducts every line or deducts nothing.
#[derive(Clone)]
pub struct PostgresStockLedger {
    pool: PgPool,
}

impl PostgresStockLedger {
    /// Creates a new PostgreSQL stock ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    async fn set_available(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock (product_id, available)
            VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE SET available = EXCLUDED.available
            "#,
        )
        .bind(product_id.as_str())
        .bind(quantity as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn available(&self, product_id: &ProductId) -> Result<u32> {
        let available: Option<i64> =
            sqlx::query_scalar("SELECT available FROM stock WHERE product_id = $1")
                .bind(product_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        available
            .map(|a| a as u32)
            .ok_or_else(|| StoreError::UnknownProduct(product_id.clone()))
    }

    async fn reserve(&self, order_id: OrderId, lines: &[OrderLine]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let already_held: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM stock_reservations WHERE order_id = $1 LIMIT 1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        if already_held.is_some() {
            return Ok(false);
        }

        for line in lines {
            // The guard in the WHERE clause keeps the deduction atomic per
            // row; zero rows affected means the line cannot be covered and
            // the whole transaction rolls back.
            let result = sqlx::query(
                r#"
                UPDATE stock SET available = available - $2
                WHERE product_id = $1 AND available >= $2
                "#,
            )
            .bind(line.product_id.as_str())
            .bind(line.quantity as i64)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let available: Option<i64> =
                    sqlx::query_scalar("SELECT available FROM stock WHERE product_id = $1")
                        .bind(line.product_id.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;

                return match available {
                    Some(available) => Err(StoreError::InsufficientStock {
                        product_id: line.product_id.clone(),
                        requested: line.quantity,
                        available: available as u32,
                    }),
                    None => Err(StoreError::UnknownProduct(line.product_id.clone())),
                };
            }

            sqlx::query(
                r#"
                INSERT INTO stock_reservations (order_id, product_id, quantity)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(line.product_id.as_str())
            .bind(line.quantity as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(%order_id, lines = lines.len(), "stock reserved");
        Ok(true)
    }

    async fn release(&self, order_id: OrderId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let held = sqlx::query(
            r#"
            DELETE FROM stock_reservations WHERE order_id = $1
            RETURNING product_id, quantity
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        if held.is_empty() {
            return Ok(false);
        }

        for row in &held {
            let product_id: String = row.try_get("product_id")?;
            let quantity: i64 = row.try_get("quantity")?;

            sqlx::query("UPDATE stock SET available = available + $2 WHERE product_id = $1")
                .bind(&product_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!(%order_id, lines = held.len(), "stock released");
        Ok(true)
    }
}

/// PostgreSQL-backed refund ledger.
#[derive(Clone)]
pub struct PostgresRefundLedger {
    pool: PgPool,
}

impl PostgresRefundLedger {
    /// Creates a new PostgreSQL refund ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_refund(row: PgRow) -> Result<RefundRecord> {
        let body: serde_json::Value = row.try_get("body")?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl RefundLedger for PostgresRefundLedger {
    async fn append(&self, refund: &RefundRecord) -> Result<()> {
        let body = serde_json::to_value(refund)?;

        sqlx::query(
            r#"
            INSERT INTO refunds (id, order_id, status, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(refund.id.as_uuid())
        .bind(refund.order_id.as_uuid())
        .bind(refund.status.as_str())
        .bind(body)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, refund: &RefundRecord) -> Result<()> {
        let body = serde_json::to_value(refund)?;

        let result = sqlx::query(
            r#"
            UPDATE refunds SET status = $2, body = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(refund.id.as_uuid())
        .bind(refund.status.as_str())
        .bind(body)
        .bind(refund.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RefundNotFound(refund.id));
        }
        Ok(())
    }

    async fn get(&self, id: RefundId) -> Result<RefundRecord> {
        let row = sqlx::query("SELECT body FROM refunds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_refund)
            .transpose()?
            .ok_or(StoreError::RefundNotFound(id))
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<RefundRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM refunds
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_refund).collect()
    }
}

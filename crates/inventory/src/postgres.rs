use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::error::{InventoryError, Result};
use crate::stock::{ReservationRecord, ReservationStatus, RollbackOutcome, StockLevel};
use crate::store::StockStore;

/// PostgreSQL-backed stock store.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_level(row: PgRow) -> Result<StockLevel> {
        Ok(StockLevel {
            product_id: ProductId::new(row.try_get("product_id")?),
            available: row.try_get("available")?,
            locked: row.try_get("locked")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_record(row: PgRow) -> Result<ReservationRecord> {
        let status: i16 = row.try_get("status")?;
        Ok(ReservationRecord {
            order_id: OrderId::new(row.try_get("order_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            status: ReservationStatus::try_from(status)
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Loads and row-locks a stock row inside `tx`.
    async fn lock_level(
        tx: &mut Transaction<'_, Postgres>,
        product_id: ProductId,
    ) -> Result<StockLevel> {
        let row = sqlx::query(
            r#"
            SELECT product_id, available, locked, version, updated_at
            FROM stock
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(InventoryError::ProductNotFound(product_id))?;

        Self::row_to_level(row)
    }

    async fn save_level(tx: &mut Transaction<'_, Postgres>, level: &StockLevel) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stock
            SET available = $2, locked = $3, version = $4, updated_at = $5
            WHERE product_id = $1
            "#,
        )
        .bind(level.product_id.as_i64())
        .bind(level.available)
        .bind(level.locked)
        .bind(level.version)
        .bind(level.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn lock_record(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Option<ReservationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, status, created_at, updated_at
            FROM stock_reservations
            WHERE order_id = $1 AND product_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_i64())
        .bind(product_id.as_i64())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn set_record_status(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        product_id: ProductId,
        status: ReservationStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $3, updated_at = NOW()
            WHERE order_id = $1 AND product_id = $2
            "#,
        )
        .bind(order_id.as_i64())
        .bind(product_id.as_i64())
        .bind(status.as_i16())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn get(&self, product_id: ProductId) -> Result<Option<StockLevel>> {
        let row = sqlx::query(
            "SELECT product_id, available, locked, version, updated_at FROM stock WHERE product_id = $1",
        )
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_level).transpose()
    }

    async fn ensure(&self, product_id: ProductId, available: i64) -> Result<StockLevel> {
        let level = StockLevel::new(product_id, available);
        sqlx::query(
            r#"
            INSERT INTO stock (product_id, available, locked, version, updated_at)
            VALUES ($1, $2, 0, $3, $4)
            ON CONFLICT (product_id) DO NOTHING
            "#,
        )
        .bind(product_id.as_i64())
        .bind(level.available)
        .bind(level.version)
        .bind(level.updated_at)
        .execute(&self.pool)
        .await?;

        self.get(product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound(product_id))
    }

    async fn set_available(&self, product_id: ProductId, available: i64) -> Result<StockLevel> {
        let mut tx = self.pool.begin().await?;
        let mut level = Self::lock_level(&mut tx, product_id).await?;
        level.set_available(available);
        Self::save_level(&mut tx, &level).await?;
        tx.commit().await?;
        Ok(level)
    }

    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<StockLevel> {
        let mut tx = self.pool.begin().await?;
        let mut level = Self::lock_level(&mut tx, product_id).await?;

        if let Some(existing) = Self::lock_record(&mut tx, order_id, product_id).await? {
            return match existing.status {
                ReservationStatus::RolledBack => Err(InventoryError::ReservationRolledBack {
                    order_id,
                    product_id,
                }),
                _ => Ok(level),
            };
        }

        level.reserve(quantity)?;
        Self::save_level(&mut tx, &level).await?;

        let record = ReservationRecord::new(order_id, product_id, quantity);
        sqlx::query(
            r#"
            INSERT INTO stock_reservations (order_id, product_id, quantity, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.order_id.as_i64())
        .bind(record.product_id.as_i64())
        .bind(record.quantity)
        .bind(record.status.as_i16())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(level)
    }

    async fn rollback(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<RollbackOutcome> {
        let mut tx = self.pool.begin().await?;

        let reserved = Self::lock_record(&mut tx, order_id, product_id)
            .await?
            .is_some_and(|r| r.status == ReservationStatus::Reserved);
        if !reserved {
            return Ok(RollbackOutcome::Skipped);
        }

        let mut level = Self::lock_level(&mut tx, product_id).await?;
        level.release(quantity)?;
        Self::save_level(&mut tx, &level).await?;
        Self::set_record_status(&mut tx, order_id, product_id, ReservationStatus::RolledBack)
            .await?;

        tx.commit().await?;
        Ok(RollbackOutcome::Applied)
    }

    async fn confirm(&self, order_id: OrderId, product_id: ProductId) -> Result<StockLevel> {
        let mut tx = self.pool.begin().await?;

        let record = Self::lock_record(&mut tx, order_id, product_id)
            .await?
            .ok_or(InventoryError::ReservationNotFound {
                order_id,
                product_id,
            })?;
        let mut level = Self::lock_level(&mut tx, product_id).await?;

        match record.status {
            ReservationStatus::Confirmed => return Ok(level),
            ReservationStatus::RolledBack => {
                return Err(InventoryError::ReservationRolledBack {
                    order_id,
                    product_id,
                });
            }
            ReservationStatus::Reserved => {}
        }

        level.confirm(record.quantity)?;
        Self::save_level(&mut tx, &level).await?;
        Self::set_record_status(&mut tx, order_id, product_id, ReservationStatus::Confirmed)
            .await?;

        tx.commit().await?;
        Ok(level)
    }

    async fn reservation(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Option<ReservationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, status, created_at, updated_at
            FROM stock_reservations
            WHERE order_id = $1 AND product_id = $2
            "#,
        )
        .bind(order_id.as_i64())
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn reserved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReservationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, status, created_at, updated_at
            FROM stock_reservations
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at
            "#,
        )
        .bind(ReservationStatus::Reserved.as_i16())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}

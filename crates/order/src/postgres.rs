use async_trait::async_trait;
use common::{BuyerId, Money, OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{OrderError, Result};
use crate::order::{Order, OrderLineItem, OrderStatus, ShippingInfo};
use crate::store::OrderStore;

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
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

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: i16 = row.try_get("status")?;
        Ok(Order {
            order_id: OrderId::new(row.try_get("order_id")?),
            buyer_id: BuyerId::new(row.try_get("buyer_id")?),
            pay_amount: Money::from_cents(row.try_get("pay_amount")?),
            shipping: ShippingInfo {
                address: row.try_get("receive_address")?,
                name: row.try_get("receive_name")?,
                phone: row.try_get("receive_phone")?,
            },
            status: OrderStatus::try_from(status).map_err(|e| sqlx::Error::Decode(e.into()))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_line_item(row: PgRow) -> Result<OrderLineItem> {
        Ok(OrderLineItem {
            order_id: OrderId::new(row.try_get("order_id")?),
            buyer_id: BuyerId::new(row.try_get("buyer_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(&self, order: &Order, line_item: &OrderLineItem) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, buyer_id, pay_amount, receive_address, receive_name,
                                receive_phone, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.order_id.as_i64())
        .bind(order.buyer_id.as_i64())
        .bind(order.pay_amount.cents())
        .bind(&order.shipping.address)
        .bind(&order.shipping.name)
        .bind(&order.shipping.phone)
        .bind(order.status.as_i16())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO order_line_items (order_id, buyer_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(line_item.order_id.as_i64())
        .bind(line_item.buyer_id.as_i64())
        .bind(line_item.product_id.as_i64())
        .bind(line_item.quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, buyer_id, pay_amount, receive_address, receive_name, receive_phone,
                   status, created_at, updated_at
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn line_item(&self, order_id: OrderId) -> Result<Option<OrderLineItem>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, buyer_id, product_id, quantity
            FROM order_line_items
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_line_item).transpose()
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        if !from.allows(to) {
            return Err(OrderError::InvalidStatusTransition { order_id, from, to });
        }

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, updated_at = NOW()
            WHERE order_id = $1 AND status = $2
            "#,
        )
        .bind(order_id.as_i64())
        .bind(from.as_i16())
        .bind(to.as_i16())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pending_line_items(&self) -> Result<Vec<OrderLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT li.order_id, li.buyer_id, li.product_id, li.quantity
            FROM order_line_items li
            JOIN orders o ON o.order_id = li.order_id
            WHERE o.status = $1
            ORDER BY o.created_at
            "#,
        )
        .bind(OrderStatus::Pending.as_i16())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_line_item).collect()
    }
}

use async_trait::async_trait;
use common::{Money, ProductId, RoomId};
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::Result;
use crate::goods::{Goods, GoodsStatus, RoomGoods};
use crate::store::CatalogStore;

const GOODS_COLUMNS: &str =
    "goods_id, category_id, brand_name, title, market_price, price, brief, head_imgs, status";

/// PostgreSQL-backed catalog.
#[derive(Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
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

    /// Inserts or updates a goods entry.
    pub async fn upsert_goods(&self, goods: &Goods) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO goods (goods_id, category_id, brand_name, title, market_price, price, brief, head_imgs, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (goods_id) DO UPDATE SET
                category_id = EXCLUDED.category_id,
                brand_name = EXCLUDED.brand_name,
                title = EXCLUDED.title,
                market_price = EXCLUDED.market_price,
                price = EXCLUDED.price,
                brief = EXCLUDED.brief,
                head_imgs = EXCLUDED.head_imgs,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(goods.goods_id.as_i64())
        .bind(goods.category_id)
        .bind(&goods.brand_name)
        .bind(&goods.title)
        .bind(goods.market_price.cents())
        .bind(goods.price.cents())
        .bind(&goods.brief)
        .bind(Json(&goods.head_imgs))
        .bind(goods.status.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Places goods in a room.
    pub async fn place(&self, placement: &RoomGoods) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO room_goods (room_id, goods_id, weight, is_current)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (room_id, goods_id) DO UPDATE SET
                weight = EXCLUDED.weight,
                is_current = EXCLUDED.is_current
            "#,
        )
        .bind(placement.room_id.as_i64())
        .bind(placement.goods_id.as_i64())
        .bind(placement.weight)
        .bind(placement.is_current)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_goods(row: PgRow) -> Result<Goods> {
        let head_imgs: Json<Vec<String>> = row.try_get("head_imgs")?;
        Ok(Goods {
            goods_id: ProductId::new(row.try_get("goods_id")?),
            category_id: row.try_get("category_id")?,
            brand_name: row.try_get("brand_name")?,
            title: row.try_get("title")?,
            market_price: Money::from_cents(row.try_get("market_price")?),
            price: Money::from_cents(row.try_get("price")?),
            brief: row.try_get("brief")?,
            head_imgs: head_imgs.0,
            status: GoodsStatus::from_i16(row.try_get("status")?),
        })
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn goods(&self, goods_id: ProductId) -> Result<Option<Goods>> {
        let row = sqlx::query(&format!(
            "SELECT {GOODS_COLUMNS} FROM goods WHERE goods_id = $1"
        ))
        .bind(goods_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_goods).transpose()
    }

    async fn goods_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Goods>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<i64> = ids.iter().map(ProductId::as_i64).collect();

        // Keep the caller's order: array_position of each id in the input.
        let rows = sqlx::query(&format!(
            "SELECT {GOODS_COLUMNS} FROM goods WHERE goods_id = ANY($1) ORDER BY array_position($1, goods_id)"
        ))
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_goods).collect()
    }

    async fn room_goods(&self, room_id: RoomId) -> Result<Vec<RoomGoods>> {
        let rows = sqlx::query(
            r#"
            SELECT room_id, goods_id, weight, is_current
            FROM room_goods
            WHERE room_id = $1
            ORDER BY weight ASC, id ASC
            "#,
        )
        .bind(room_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<RoomGoods> {
                Ok(RoomGoods {
                    room_id: RoomId::new(row.try_get("room_id")?),
                    goods_id: ProductId::new(row.try_get("goods_id")?),
                    weight: row.try_get("weight")?,
                    is_current: row.try_get("is_current")?,
                })
            })
            .collect()
    }
}

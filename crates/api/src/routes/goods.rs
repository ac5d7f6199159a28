//! Catalog endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use catalog::{Goods, GoodsStatus};
use common::{BuyerId, ProductId, RoomId};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct GoodsQuery {
    #[serde(default)]
    pub buyer_id: i64,
}

#[derive(Serialize)]
pub struct GoodsResponse {
    pub goods_id: i64,
    pub category_id: i64,
    pub brand_name: String,
    pub title: String,
    pub market_price_cents: i64,
    pub price_cents: i64,
    pub brief: String,
    pub head_imgs: Vec<String>,
    pub on_sale: bool,
}

impl From<Goods> for GoodsResponse {
    fn from(goods: Goods) -> Self {
        Self {
            goods_id: goods.goods_id.as_i64(),
            category_id: goods.category_id,
            brand_name: goods.brand_name,
            title: goods.title,
            market_price_cents: goods.market_price.cents(),
            price_cents: goods.price.cents(),
            brief: goods.brief,
            head_imgs: goods.head_imgs,
            on_sale: goods.status == GoodsStatus::OnSale,
        }
    }
}

#[derive(Serialize)]
pub struct RoomGoodsResponse {
    pub current_goods_id: Option<i64>,
    pub goods: Vec<GoodsResponse>,
}

/// GET /goods/{id}?buyer_id=: goods details.
#[tracing::instrument(skip(state))]
pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<GoodsQuery>,
) -> Result<Json<GoodsResponse>, ApiError> {
    let goods_id = ProductId::new(parse_id("goods", &id)?);
    let goods = state
        .catalog
        .get_goods_detail(goods_id, BuyerId::new(query.buyer_id))
        .await?;

    Ok(Json(goods.into()))
}

/// GET /rooms/{id}/goods: goods of a live room, by weight.
#[tracing::instrument(skip(state))]
pub async fn by_room(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RoomGoodsResponse>, ApiError> {
    let room_id = RoomId::new(parse_id("room", &id)?);
    let list = state.catalog.get_goods_by_room(room_id).await?;

    Ok(Json(RoomGoodsResponse {
        current_goods_id: list.current_goods_id.map(|id| id.as_i64()),
        goods: list.goods.into_iter().map(GoodsResponse::from).collect(),
    }))
}

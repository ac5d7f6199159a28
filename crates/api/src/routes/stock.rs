//! Inventory endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{OrderId, ProductId};
use inventory::StockLevel;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct ReduceStockRequest {
    pub quantity: i64,
    pub order_id: i64,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: i64,
    pub available: i64,
    pub locked: i64,
    pub version: i64,
}

impl From<StockLevel> for StockResponse {
    fn from(level: StockLevel) -> Self {
        Self {
            product_id: level.product_id.as_i64(),
            available: level.available,
            locked: level.locked,
            version: level.version,
        }
    }
}

/// GET /stock/{product_id}: current stock of a product.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id = ProductId::new(parse_id("product", &id)?);
    let level = state.inventory.get(product_id).await?;
    Ok(Json(level.into()))
}

/// PUT /stock/{product_id}: overwrite the available quantity.
#[tracing::instrument(skip(state, req))]
pub async fn set(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id = ProductId::new(parse_id("product", &id)?);
    let level = state.inventory.set(product_id, req.quantity).await?;
    Ok(Json(level.into()))
}

/// POST /stock/{product_id}/reduce: reserve stock for an order.
#[tracing::instrument(skip(state, req), fields(order_id = req.order_id, quantity = req.quantity))]
pub async fn reduce(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReduceStockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id = ProductId::new(parse_id("product", &id)?);
    let level = state
        .inventory
        .reserve(product_id, req.quantity, OrderId::new(req.order_id))
        .await?;
    Ok(Json(level.into()))
}

//! Order creation, lookup and payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{BuyerId, OrderId, ProductId};
use order::{CreateOrder, Order, OrderLineItem, ShippingInfo};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub buyer_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: i64,
    pub pay_amount_cents: i64,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: i64,
    pub buyer_id: i64,
    pub pay_amount_cents: i64,
    pub status: String,
    pub status_code: i16,
    pub address: String,
    pub name: String,
    pub phone: String,
    pub line_item: Option<LineItemResponse>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub product_id: i64,
    pub quantity: i64,
}

impl OrderResponse {
    fn new(order: Order, line_item: Option<OrderLineItem>) -> Self {
        Self {
            order_id: order.order_id.as_i64(),
            buyer_id: order.buyer_id.as_i64(),
            pay_amount_cents: order.pay_amount.cents(),
            status: order.status.to_string(),
            status_code: order.status.as_i16(),
            address: order.shipping.address,
            name: order.shipping.name,
            phone: order.shipping.phone,
            line_item: line_item.map(|item| LineItemResponse {
                product_id: item.product_id.as_i64(),
                quantity: item.quantity,
            }),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: create an order for one product line.
#[tracing::instrument(skip(state, req), fields(buyer_id = req.buyer_id, product_id = req.product_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let request = CreateOrder::new(
        BuyerId::new(req.buyer_id),
        ProductId::new(req.product_id),
        req.quantity,
    )
    .with_shipping(ShippingInfo::new(req.address, req.name, req.phone));

    let created = state.coordinator.create_order(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_id: created.order_id.as_i64(),
            pay_amount_cents: created.pay_amount.cents(),
            status: created.status.to_string(),
        }),
    ))
}

/// GET /orders/{id}: load an order with its line item.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = OrderId::new(parse_id("order", &id)?);
    let order = state
        .orders
        .find(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    let line_item = state.orders.line_item(order_id).await?;

    Ok(Json(OrderResponse::new(order, line_item)))
}

/// POST /orders/{id}/pay: pay a pending order.
#[tracing::instrument(skip(state))]
pub async fn pay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = OrderId::new(parse_id("order", &id)?);
    let order = state.coordinator.pay_order(order_id).await?;
    let line_item = state.orders.line_item(order_id).await?;

    Ok(Json(OrderResponse::new(order, line_item)))
}

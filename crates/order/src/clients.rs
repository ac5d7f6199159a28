//! Calls from the order service to the catalog and inventory services.
//!
//! The coordinator only sees the [`CatalogClient`] and [`InventoryClient`]
//! traits. The `Local*` adapters call the services in-process and translate
//! their errors into [`RpcError`] codes, the way a remote transport would.

use std::time::Duration;

use async_trait::async_trait;
use catalog::{CatalogError, CatalogService};
use common::{BuyerId, Money, OrderId, ProductId};
use inventory::{InventoryError, InventoryLedger};
use thiserror::Error;

/// Failure of a call to another service, reduced to a status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The callee refused because of its current state (e.g. not enough stock).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("internal: {0}")]
    Internal(String),
}

/// Price information the order service needs about a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodsQuote {
    pub product_id: ProductId,
    pub title: String,
    pub price: Money,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn goods_detail(
        &self,
        product_id: ProductId,
        buyer_id: BuyerId,
    ) -> Result<GoodsQuote, RpcError>;
}

#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Reserves stock for an order; returns the remaining available quantity.
    async fn reserve(
        &self,
        product_id: ProductId,
        quantity: i64,
        order_id: OrderId,
    ) -> Result<i64, RpcError>;

    /// Turns the order's reservation into a sale.
    async fn confirm(&self, order_id: OrderId, product_id: ProductId) -> Result<(), RpcError>;
}

/// In-process catalog client.
#[derive(Clone)]
pub struct LocalCatalogClient {
    service: CatalogService,
}

impl LocalCatalogClient {
    pub fn new(service: CatalogService) -> Self {
        Self { service }
    }
}

impl From<CatalogError> for RpcError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::InvalidArgument(msg) => RpcError::InvalidArgument(msg),
            CatalogError::GoodsNotFound(_) => RpcError::NotFound(e.to_string()),
            CatalogError::Unavailable(_) | CatalogError::Database(_) => {
                RpcError::Unavailable(e.to_string())
            }
            CatalogError::Migration(_) => RpcError::Internal(e.to_string()),
        }
    }
}

#[async_trait]
impl CatalogClient for LocalCatalogClient {
    async fn goods_detail(
        &self,
        product_id: ProductId,
        buyer_id: BuyerId,
    ) -> Result<GoodsQuote, RpcError> {
        let goods = self.service.get_goods_detail(product_id, buyer_id).await?;
        Ok(GoodsQuote {
            product_id: goods.goods_id,
            title: goods.title,
            price: goods.price,
        })
    }
}

/// In-process inventory client.
#[derive(Clone)]
pub struct LocalInventoryClient {
    ledger: InventoryLedger,
}

impl LocalInventoryClient {
    pub fn new(ledger: InventoryLedger) -> Self {
        Self { ledger }
    }
}

impl From<InventoryError> for RpcError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::InvalidArgument(msg) => RpcError::InvalidArgument(msg),
            InventoryError::ProductNotFound(_) | InventoryError::ReservationNotFound { .. } => {
                RpcError::NotFound(e.to_string())
            }
            InventoryError::InsufficientStock { .. }
            | InventoryError::ReservationRolledBack { .. } => {
                RpcError::FailedPrecondition(e.to_string())
            }
            InventoryError::Unavailable(_)
            | InventoryError::Lock(_)
            | InventoryError::Database(_) => RpcError::Unavailable(e.to_string()),
            InventoryError::LockedUnderflow { .. } | InventoryError::Migration(_) => {
                RpcError::Internal(e.to_string())
            }
        }
    }
}

#[async_trait]
impl InventoryClient for LocalInventoryClient {
    async fn reserve(
        &self,
        product_id: ProductId,
        quantity: i64,
        order_id: OrderId,
    ) -> Result<i64, RpcError> {
        let level = self.ledger.reserve(product_id, quantity, order_id).await?;
        Ok(level.available)
    }

    async fn confirm(&self, order_id: OrderId, product_id: ProductId) -> Result<(), RpcError> {
        self.ledger.confirm(order_id, product_id).await?;
        Ok(())
    }
}

//! The inventory ledger: reservation, compensation and administration of stock.

use std::sync::Arc;
use std::time::Duration;

use common::{OrderId, ProductId};

use crate::error::{InventoryError, Result};
use crate::lock::DistributedLock;
use crate::stock::{ReservationRecord, RollbackOutcome, StockLevel};
use crate::store::StockStore;

/// Default bound on waiting for a product lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(3);

/// Owns stock levels and reservation records.
///
/// Reservations of one product are serialized by the distributed lock keyed
/// by [`lock_key`](Self::lock_key). Rollback, confirm and set rely on the
/// row locking of the store.
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn StockStore>,
    lock: Arc<dyn DistributedLock>,
    lock_wait: Duration,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn StockStore>, lock: Arc<dyn DistributedLock>) -> Self {
        Self {
            store,
            lock,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Key of the distributed lock guarding a product's stock.
    pub fn lock_key(product_id: ProductId) -> String {
        format!("stock-{product_id}")
    }

    /// Reserves `quantity` of a product for an order.
    ///
    /// Repeating a reservation for the same (order, product) is a no-op that
    /// returns the current level.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: ProductId,
        quantity: i64,
        order_id: OrderId,
    ) -> Result<StockLevel> {
        if !product_id.is_valid() {
            return Err(InventoryError::InvalidArgument(format!(
                "product id must be positive, got {product_id}"
            )));
        }
        if quantity <= 0 {
            return Err(InventoryError::InvalidArgument(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if !order_id.is_valid() {
            return Err(InventoryError::InvalidArgument(format!(
                "order id must be positive, got {order_id}"
            )));
        }

        let guard = self
            .lock
            .acquire(&Self::lock_key(product_id), self.lock_wait)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "could not lock product stock"))?;

        let result = self.store.reserve(order_id, product_id, quantity).await;

        if let Err(e) = guard.release().await {
            tracing::error!(error = %e, "failed to release product lock");
        }

        match &result {
            Ok(level) => {
                metrics::counter!("inventory_reservations_total").increment(1);
                tracing::info!(
                    available = level.available,
                    locked = level.locked,
                    "stock reserved"
                );
            }
            Err(e @ InventoryError::InsufficientStock { .. }) => {
                metrics::counter!("inventory_reservations_rejected_total").increment(1);
                tracing::warn!(error = %e, "reservation rejected");
            }
            Err(e) => tracing::error!(error = %e, "reservation failed"),
        }
        result
    }

    /// Compensates a reservation. Idempotent: only a `Reserved` record for
    /// (order, product) is rolled back; anything else is skipped.
    #[tracing::instrument(skip(self))]
    pub async fn rollback(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<RollbackOutcome> {
        if !product_id.is_valid() || quantity <= 0 {
            return Err(InventoryError::InvalidArgument(format!(
                "cannot roll back {quantity} of product {product_id}"
            )));
        }

        match self.store.rollback(order_id, product_id, quantity).await {
            Ok(RollbackOutcome::Applied) => {
                metrics::counter!("inventory_rollbacks_applied_total").increment(1);
                tracing::info!("reservation rolled back");
                Ok(RollbackOutcome::Applied)
            }
            Ok(RollbackOutcome::Skipped) => {
                metrics::counter!("inventory_rollbacks_skipped_total").increment(1);
                tracing::info!("no reserved stock to roll back");
                Ok(RollbackOutcome::Skipped)
            }
            Err(e @ InventoryError::LockedUnderflow { .. }) => {
                tracing::error!(error = %e, "rollback would corrupt stock counters");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "rollback failed");
                Err(e)
            }
        }
    }

    /// Turns a reservation into a sale: the reserved quantity leaves `locked`.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, order_id: OrderId, product_id: ProductId) -> Result<StockLevel> {
        let level = self.store.confirm(order_id, product_id).await?;
        tracing::info!(locked = level.locked, "reservation confirmed");
        Ok(level)
    }

    /// Reads the stock of a product.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, product_id: ProductId) -> Result<StockLevel> {
        if !product_id.is_valid() {
            return Err(InventoryError::InvalidArgument(format!(
                "product id must be positive, got {product_id}"
            )));
        }
        self.store
            .get(product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound(product_id))
    }

    /// Overwrites the available quantity of a known product.
    #[tracing::instrument(skip(self))]
    pub async fn set(&self, product_id: ProductId, quantity: i64) -> Result<StockLevel> {
        if !product_id.is_valid() {
            return Err(InventoryError::InvalidArgument(format!(
                "product id must be positive, got {product_id}"
            )));
        }
        if quantity < 0 {
            return Err(InventoryError::InvalidArgument(format!(
                "quantity must not be negative, got {quantity}"
            )));
        }

        match self.store.set_available(product_id, quantity).await {
            Ok(level) => {
                tracing::info!(available = level.available, "stock overwritten");
                Ok(level)
            }
            Err(InventoryError::ProductNotFound(id)) => Err(InventoryError::InvalidArgument(
                format!("unknown product {id}"),
            )),
            Err(e) => Err(e),
        }
    }

    /// Creates the stock row of a product unless it exists already.
    pub async fn register(&self, product_id: ProductId, available: i64) -> Result<StockLevel> {
        if !product_id.is_valid() || available < 0 {
            return Err(InventoryError::InvalidArgument(format!(
                "cannot register {available} of product {product_id}"
            )));
        }
        self.store.ensure(product_id, available).await
    }

    /// Reads the reservation record of (order, product).
    pub async fn reservation(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Option<ReservationRecord>> {
        self.store.reservation(order_id, product_id).await
    }

    /// Lists reservations still holding stock that were made more than
    /// `age` ago.
    pub async fn stale_reservations(&self, age: Duration) -> Result<Vec<ReservationRecord>> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| InventoryError::InvalidArgument(e.to_string()))?;
        self.store.reserved_before(chrono::Utc::now() - age).await
    }
}

//! Storage seam for stock levels and reservation records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};

use crate::error::Result;
use crate::stock::{ReservationRecord, RollbackOutcome, StockLevel};

/// Persistence for stock rows and reservation records.
///
/// Every mutating method is one storage transaction: it either applies all
/// of its writes or none. Callers serialize [`reserve`](Self::reserve) per
/// product with a [`DistributedLock`](crate::DistributedLock); the other
/// mutations rely on row locking.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Loads the stock row of a product.
    async fn get(&self, product_id: ProductId) -> Result<Option<StockLevel>>;

    /// Creates the stock row if it does not exist yet and returns the current row.
    async fn ensure(&self, product_id: ProductId, available: i64) -> Result<StockLevel>;

    /// Overwrites the available quantity of an existing product.
    async fn set_available(&self, product_id: ProductId, available: i64) -> Result<StockLevel>;

    /// Moves `quantity` from available to locked and records the reservation.
    ///
    /// If a reservation for (order, product) already exists nothing is
    /// written: a `Reserved` or `Confirmed` one returns the current row, a
    /// rolled back one is an error.
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<StockLevel>;

    /// Returns `quantity` to available if a `Reserved` record exists for
    /// (order, product) and marks it rolled back; otherwise does nothing.
    async fn rollback(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<RollbackOutcome>;

    /// Drops the reserved quantity from locked and marks the record confirmed.
    async fn confirm(&self, order_id: OrderId, product_id: ProductId) -> Result<StockLevel>;

    /// Loads the reservation record of (order, product).
    async fn reservation(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Option<ReservationRecord>>;

    /// Lists `Reserved` records created before `cutoff`, oldest first.
    async fn reserved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReservationRecord>>;
}

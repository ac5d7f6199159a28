//! Inventory error types.

use std::time::Duration;

use common::{OrderId, ProductId};
use thiserror::Error;

/// Errors raised by a [`DistributedLock`](crate::DistributedLock) backend.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was still held by someone else when the wait ran out.
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    Timeout { key: String, waited: Duration },

    /// The lock backend failed.
    #[error("Lock backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Errors that can occur in the inventory ledger.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The request failed validation; nothing was touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No stock row exists for the product.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Not enough available stock to satisfy the reservation.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// A dependency (lock or storage) could not be reached in time. Retryable.
    #[error("Inventory unavailable: {0}")]
    Unavailable(String),

    /// Releasing or confirming would drive locked stock negative. Indicates a
    /// bookkeeping bug elsewhere and is never corrected silently.
    #[error("Locked stock underflow for product {product_id}: locked {locked}, releasing {quantity}")]
    LockedUnderflow {
        product_id: ProductId,
        locked: i64,
        quantity: i64,
    },

    /// No reservation exists for the order and product.
    #[error("No reservation for order {order_id}, product {product_id}")]
    ReservationNotFound {
        order_id: OrderId,
        product_id: ProductId,
    },

    /// The reservation was already compensated.
    #[error("Reservation for order {order_id}, product {product_id} was rolled back")]
    ReservationRolledBack {
        order_id: OrderId,
        product_id: ProductId,
    },

    /// Lock backend error.
    #[error("Lock error: {0}")]
    Lock(LockError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<LockError> for InventoryError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { .. } => InventoryError::Unavailable(e.to_string()),
            LockError::Backend(_) => InventoryError::Lock(e),
        }
    }
}

impl InventoryError {
    /// Returns true if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InventoryError::Unavailable(_) | InventoryError::Lock(_) | InventoryError::Database(_)
        )
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

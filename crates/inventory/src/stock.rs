//! Stock levels and reservation records.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};

/// Stock counters of one product.
///
/// `available` can be reserved; `locked` is reserved but not yet confirmed
/// or rolled back. Both are never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub available: i64,
    pub locked: i64,
    /// Incremented on every write.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Creates a stock row with nothing locked.
    pub fn new(product_id: ProductId, available: i64) -> Self {
        Self {
            product_id,
            available,
            locked: 0,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Moves `quantity` from available to locked.
    pub fn reserve(&mut self, quantity: i64) -> Result<()> {
        if self.available - quantity < 0 {
            return Err(InventoryError::InsufficientStock {
                product_id: self.product_id,
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        self.locked += quantity;
        self.touch();
        Ok(())
    }

    /// Moves `quantity` from locked back to available.
    pub fn release(&mut self, quantity: i64) -> Result<()> {
        self.check_locked(quantity)?;
        self.available += quantity;
        self.locked -= quantity;
        self.touch();
        Ok(())
    }

    /// Drops `quantity` from locked: the goods are sold.
    pub fn confirm(&mut self, quantity: i64) -> Result<()> {
        self.check_locked(quantity)?;
        self.locked -= quantity;
        self.touch();
        Ok(())
    }

    /// Overwrites the available quantity, leaving reservations alone.
    pub fn set_available(&mut self, available: i64) {
        self.available = available;
        self.touch();
    }

    /// Available plus locked.
    pub fn total(&self) -> i64 {
        self.available + self.locked
    }

    fn check_locked(&self, quantity: i64) -> Result<()> {
        if self.locked - quantity < 0 {
            return Err(InventoryError::LockedUnderflow {
                product_id: self.product_id,
                locked: self.locked,
                quantity,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Lifecycle of a reservation. Values match the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Reserved = 1,
    Confirmed = 2,
    RolledBack = 3,
}

impl ReservationStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for ReservationStatus {
    type Error = String;

    fn try_from(value: i16) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(ReservationStatus::Reserved),
            2 => Ok(ReservationStatus::Confirmed),
            3 => Ok(ReservationStatus::RolledBack),
            other => Err(format!("unknown reservation status {other}")),
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationStatus::Reserved => write!(f, "Reserved"),
            ReservationStatus::Confirmed => write!(f, "Confirmed"),
            ReservationStatus::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// Audit row of one reservation, keyed by (order, product).
///
/// Compensation is applied only while the record is `Reserved`, which makes
/// rollback idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationRecord {
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: i64) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            product_id,
            quantity,
            status: ReservationStatus::Reserved,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, status: ReservationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// What a rollback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Stock was returned and the record marked rolled back.
    Applied,
    /// Nothing to compensate: no `Reserved` record for the order and product.
    Skipped,
}

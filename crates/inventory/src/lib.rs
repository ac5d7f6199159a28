//! Inventory service core.
//!
//! The [`InventoryLedger`] keeps per-product stock counters and an audit
//! record per reservation. Reservations are serialized per product by a
//! [`DistributedLock`]; compensation arrives as messages on the
//! inventory-rollback topic and is applied by [`RollbackHandler`] at most
//! once per reservation.

pub mod consumer;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod memory;
pub mod postgres;
pub mod stock;
pub mod store;

pub use consumer::{ROLLBACK_CONSUMER_GROUP, RollbackHandler};
pub use error::{InventoryError, LockError, Result};
pub use ledger::{DEFAULT_LOCK_WAIT, InventoryLedger};
pub use lock::{DistributedLock, HeldLock, InMemoryLockManager, LockGuard, PostgresAdvisoryLock};
pub use memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use stock::{ReservationRecord, ReservationStatus, RollbackOutcome, StockLevel};
pub use store::StockStore;

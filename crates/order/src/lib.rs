//! Order service core.
//!
//! [`OrderSagaCoordinator`] creates orders against the catalog and the
//! inventory, backing each stock reservation with a transactional
//! compensation message. [`TimeoutReaper`] closes orders left unpaid and
//! releases their stock; [`OrderTransactionChecker`] answers broker
//! check-backs for outcomes that were never reported. [`RecoverySweep`]
//! re-drives that compensation after a restart.

pub mod checker;
pub mod clients;
pub mod coordinator;
pub mod error;
pub mod order;
pub mod postgres;
pub mod recovery;
pub mod store;
pub mod timeout;

pub use checker::OrderTransactionChecker;
pub use clients::{
    CatalogClient, GoodsQuote, InventoryClient, LocalCatalogClient, LocalInventoryClient, RpcError,
};
pub use coordinator::{CoordinatorConfig, DEFAULT_RPC_TIMEOUT, OrderSagaCoordinator};
pub use error::{OrderError, Result};
pub use order::{CreateOrder, Order, OrderLineItem, OrderResult, OrderStatus, ShippingInfo};
pub use postgres::PostgresOrderStore;
pub use recovery::{DEFAULT_RECOVERY_GRACE, RecoveryReport, RecoverySweep};
pub use store::{InMemoryOrderStore, OrderStore};
pub use timeout::{PAY_TIMEOUT_CONSUMER_GROUP, TimeoutReaper};

//! Shared types for the order platform services.
//!
//! Holds what every service agrees on: integer identifiers, money,
//! the stock message payload and its topics, and order id generation.

pub mod error;
pub mod message;
pub mod snowflake;
pub mod types;

pub use error::IdError;
pub use message::{StockMessage, TOPIC_INVENTORY_ROLLBACK, TOPIC_ORDER_PAY_TIMEOUT};
pub use snowflake::{DEFAULT_EPOCH, IdGenerator};
pub use types::{BuyerId, Money, OrderId, ProductId, RoomId};

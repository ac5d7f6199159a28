//! Order error types.

use broker::BrokerError;
use common::OrderId;
use thiserror::Error;

use crate::clients::RpcError;
use crate::order::OrderStatus;

/// Errors that can occur in the order service.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The request failed validation; nothing was touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No order exists with the given id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order is not in a status that allows the requested change.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The inventory refused the reservation.
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// A downstream service call failed.
    #[error("Downstream call failed: {0}")]
    Downstream(#[from] RpcError),

    /// The message broker failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Order storage failed outside of the database driver.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The order could not be created; stock is being compensated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderError {
    /// Text safe to show to a caller. Only validation, lookup and business
    /// rejections carry detail; everything else is a generic internal error.
    pub fn client_message(&self) -> String {
        match self {
            OrderError::InvalidArgument(_)
            | OrderError::NotFound(_)
            | OrderError::InvalidStatusTransition { .. }
            | OrderError::InsufficientStock(_) => self.to_string(),
            _ => "internal error".to_string(),
        }
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn infrastructure_errors_are_hidden_from_clients() {
        let hidden = [
            OrderError::Storage("disk full".into()),
            OrderError::Internal("create order failed".into()),
            OrderError::Downstream(RpcError::DeadlineExceeded(Duration::from_secs(3))),
            OrderError::Broker(BrokerError::Shutdown),
        ];
        for err in hidden {
            assert_eq!(err.client_message(), "internal error");
        }
    }

    #[test]
    fn business_errors_keep_their_detail() {
        let err = OrderError::InvalidArgument("buyer id must be positive".into());
        assert!(err.client_message().contains("buyer id"));

        let err = OrderError::InsufficientStock("product 42".into());
        assert!(err.client_message().contains("product 42"));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use broker::{LocalTransactionState, Message, TransactionChecker};
use common::StockMessage;

use crate::store::OrderStore;

/// Resolves half messages whose outcome never reached the broker.
///
/// An order that exists was created successfully, so its compensation is
/// discarded. A missing order means creation failed after the half message
/// was staged, so the compensation is released.
pub struct OrderTransactionChecker {
    orders: Arc<dyn OrderStore>,
}

impl OrderTransactionChecker {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl TransactionChecker for OrderTransactionChecker {
    #[tracing::instrument(skip_all, fields(message_id = %message.id))]
    async fn check(&self, message: &Message) -> LocalTransactionState {
        let payload: StockMessage = match message.decode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "undecodable half message, discarding");
                return LocalTransactionState::Rollback;
            }
        };

        let state = match self.orders.find(payload.order_id).await {
            Ok(None) => LocalTransactionState::Commit,
            Ok(Some(_)) => LocalTransactionState::Rollback,
            Err(e) => {
                tracing::warn!(error = %e, "order lookup failed, asking again later");
                LocalTransactionState::Unknown
            }
        };
        metrics::counter!("order_transaction_checks_total", "state" => state.as_str())
            .increment(1);
        tracing::info!(order_id = %payload.order_id, %state, "half message checked back");
        state
    }
}

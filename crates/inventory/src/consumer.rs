//! Subscriber applying compensation messages from the inventory-rollback topic.

use async_trait::async_trait;
use broker::{ConsumeResult, Message, MessageHandler};
use common::StockMessage;

use crate::error::InventoryError;
use crate::ledger::InventoryLedger;

/// Consumer group of the inventory service on the rollback topic.
pub const ROLLBACK_CONSUMER_GROUP: &str = "inventory-rollback-consumer";

/// Rolls back the reservation named by each delivered message.
#[derive(Clone)]
pub struct RollbackHandler {
    ledger: InventoryLedger,
}

impl RollbackHandler {
    pub fn new(ledger: InventoryLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl MessageHandler for RollbackHandler {
    async fn handle(&self, message: &Message) -> ConsumeResult {
        let payload: StockMessage = match message.decode() {
            Ok(payload) => payload,
            Err(e) => {
                // Redelivery cannot fix a malformed body.
                tracing::error!(message_id = %message.id, error = %e, "dropping undecodable rollback message");
                return ConsumeResult::Success;
            }
        };

        match self
            .ledger
            .rollback(payload.order_id, payload.product_id, payload.quantity)
            .await
        {
            Ok(_) => ConsumeResult::Success,
            Err(InventoryError::InvalidArgument(reason)) => {
                tracing::error!(message_id = %message.id, %reason, "dropping invalid rollback message");
                ConsumeResult::Success
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    order_id = %payload.order_id,
                    reconsume_times = message.reconsume_times,
                    error = %e,
                    "rollback failed, asking for redelivery"
                );
                ConsumeResult::RetryLater
            }
        }
    }
}

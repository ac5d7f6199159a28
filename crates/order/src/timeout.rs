//! Closes orders that were not paid in time.

use std::sync::Arc;

use async_trait::async_trait;
use broker::{ConsumeResult, Message, MessageHandler, Producer};
use common::{StockMessage, TOPIC_INVENTORY_ROLLBACK};

use crate::order::OrderStatus;
use crate::store::OrderStore;

/// Consumer group of the order service on the pay-timeout topic.
pub const PAY_TIMEOUT_CONSUMER_GROUP: &str = "order-pay-timeout-consumer";

/// Handles delayed pay-timeout messages.
///
/// A still pending order gets its stock released through the inventory
/// rollback topic and is then closed. The release is published before the
/// status change, so a crash in between is retried rather than leaving a
/// closed order holding stock.
#[derive(Clone)]
pub struct TimeoutReaper {
    orders: Arc<dyn OrderStore>,
    producer: Producer,
}

impl TimeoutReaper {
    pub fn new(orders: Arc<dyn OrderStore>, producer: Producer) -> Self {
        Self { orders, producer }
    }
}

#[async_trait]
impl MessageHandler for TimeoutReaper {
    async fn handle(&self, message: &Message) -> ConsumeResult {
        let payload: StockMessage = match message.decode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "dropping undecodable pay-timeout message");
                return ConsumeResult::Success;
            }
        };
        let order_id = payload.order_id;

        let order = match self.orders.find(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::warn!(%order_id, "pay timeout for unknown order");
                return ConsumeResult::Success;
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "order lookup failed, asking for redelivery");
                return ConsumeResult::RetryLater;
            }
        };

        if order.status != OrderStatus::Pending {
            tracing::debug!(%order_id, status = %order.status, "order settled before timeout");
            return ConsumeResult::Success;
        }

        let release = match Message::json(TOPIC_INVENTORY_ROLLBACK, &payload) {
            Ok(release) => release,
            Err(e) => {
                tracing::error!(%order_id, error = %e, "cannot encode stock release");
                return ConsumeResult::RetryLater;
            }
        };
        if let Err(e) = self.producer.send(release).await {
            tracing::warn!(%order_id, error = %e, "publishing stock release failed, asking for redelivery");
            return ConsumeResult::RetryLater;
        }

        match self
            .orders
            .transition_status(order_id, OrderStatus::Pending, OrderStatus::Closed)
            .await
        {
            Ok(true) => {
                metrics::counter!("orders_closed_by_timeout_total").increment(1);
                tracing::info!(%order_id, "unpaid order closed");
                ConsumeResult::Success
            }
            Ok(false) => {
                // Paid in the meantime; the release is skipped once the
                // reservation is confirmed.
                tracing::info!(%order_id, "order left pending before it could be closed");
                ConsumeResult::Success
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "closing order failed, asking for redelivery");
                ConsumeResult::RetryLater
            }
        }
    }
}

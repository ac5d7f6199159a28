//! Payload exchanged between the order and inventory services.

use serde::{Deserialize, Serialize};

use crate::types::{OrderId, ProductId};

/// Topic carrying compensation messages that release reserved stock.
pub const TOPIC_INVENTORY_ROLLBACK: &str = "inventory-rollback";

/// Topic carrying delayed pay-timeout messages back to the order service.
pub const TOPIC_ORDER_PAY_TIMEOUT: &str = "order-pay-timeout";

/// Stock movement tied to one order line.
///
/// Carried by the transactional half message, by the delayed pay-timeout
/// message and by the compensation message re-published on timeout. It is
/// everything a consumer needs to undo a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockMessage {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockMessage {
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: i64) -> Self {
        Self {
            order_id,
            product_id,
            quantity,
        }
    }
}

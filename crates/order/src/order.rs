//! Order aggregate and its status machine.

use chrono::{DateTime, Utc};
use common::{BuyerId, Money, OrderId, ProductId};
use serde::{Deserialize, Serialize};

/// The status of an order. Values match the `status` column.
///
/// ```text
/// Pending(100) ──┬──► Paid(200)
///                └──► Closed(300)
/// ```
///
/// While a payment confirms its reservation, `Paid` may still be reverted:
/// back to `Pending` if confirming failed transiently, or to `Closed` if the
/// reservation had already been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created, stock reserved, waiting for payment.
    Pending = 100,

    /// Paid; terminal once the reservation has been confirmed.
    Paid = 200,

    /// Closed without payment; the reservation was compensated (terminal state).
    Closed = 300,
}

impl OrderStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Returns true if the order can move from this status to `target`.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        matches!(
            (self, target),
            (OrderStatus::Pending, OrderStatus::Paid) | (OrderStatus::Pending, OrderStatus::Closed)
        )
    }

    /// Returns true if no forward transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Closed)
    }

    /// Returns true if `target` undoes a payment whose reservation could not
    /// be confirmed.
    pub fn can_revert_to(&self, target: OrderStatus) -> bool {
        matches!(
            (self, target),
            (OrderStatus::Paid, OrderStatus::Pending) | (OrderStatus::Paid, OrderStatus::Closed)
        )
    }

    /// Returns true if a store may move an order from this status to `target`.
    pub fn allows(&self, target: OrderStatus) -> bool {
        self.can_transition_to(target) || self.can_revert_to(target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Closed => "Closed",
        }
    }
}

impl TryFrom<i16> for OrderStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(OrderStatus::Pending),
            200 => Ok(OrderStatus::Paid),
            300 => Ok(OrderStatus::Closed),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where and to whom the goods are shipped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub address: String,
    pub name: String,
    pub phone: String,
}

impl ShippingInfo {
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            phone: phone.into(),
        }
    }
}

/// Order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub pay_amount: Money,
    pub shipping: ShippingInfo,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order.
    pub fn pending(
        order_id: OrderId,
        buyer_id: BuyerId,
        pay_amount: Money,
        shipping: ShippingInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            buyer_id,
            pay_amount,
            shipping,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The single product line of an order. Written together with the header
/// and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Input of order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub buyer_id: BuyerId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub shipping: ShippingInfo,
}

impl CreateOrder {
    pub fn new(buyer_id: BuyerId, product_id: ProductId, quantity: i64) -> Self {
        Self {
            buyer_id,
            product_id,
            quantity,
            shipping: ShippingInfo::default(),
        }
    }

    pub fn with_shipping(mut self, shipping: ShippingInfo) -> Self {
        self.shipping = shipping;
        self
    }
}

/// Outcome of a successful order creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: OrderId,
    pub pay_amount: Money,
    pub status: OrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_be_paid_or_closed() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Closed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn terminal_states_do_not_move() {
        for status in [OrderStatus::Paid, OrderStatus::Closed] {
            assert!(status.is_terminal());
            for target in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Closed] {
                assert!(!status.can_transition_to(target));
            }
        }
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn only_paid_can_be_reverted() {
        assert!(OrderStatus::Paid.can_revert_to(OrderStatus::Pending));
        assert!(OrderStatus::Paid.can_revert_to(OrderStatus::Closed));
        assert!(!OrderStatus::Closed.can_revert_to(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.can_revert_to(OrderStatus::Closed));

        assert!(OrderStatus::Pending.allows(OrderStatus::Paid));
        assert!(OrderStatus::Paid.allows(OrderStatus::Pending));
        assert!(!OrderStatus::Closed.allows(OrderStatus::Pending));
        assert!(!OrderStatus::Closed.allows(OrderStatus::Paid));
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Closed] {
            assert_eq!(OrderStatus::try_from(status.as_i16()), Ok(status));
        }
        assert_eq!(OrderStatus::Closed.as_i16(), 300);
        assert!(OrderStatus::try_from(150).is_err());
    }

    #[test]
    fn new_orders_are_pending() {
        let order = Order::pending(
            OrderId::new(1),
            BuyerId::new(2),
            Money::from_cents(1_000),
            ShippingInfo::new("1 Main St", "Ada", "555-0100"),
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.created_at, order.updated_at);
    }
}

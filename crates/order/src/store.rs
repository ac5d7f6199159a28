use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{OrderError, Result};
use crate::order::{Order, OrderLineItem, OrderStatus};

/// Persistence for orders and their line items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes an order header and its line item atomically.
    async fn create(&self, order: &Order, line_item: &OrderLineItem) -> Result<()>;

    async fn find(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn line_item(&self, order_id: OrderId) -> Result<Option<OrderLineItem>>;

    /// Moves an order from `from` to `to` if it is still in `from`.
    ///
    /// Returns false when the order is missing or its status has changed.
    /// Fails with `InvalidStatusTransition` unless `from.allows(to)`.
    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool>;

    /// Line items of every order still awaiting payment.
    async fn pending_line_items(&self) -> Result<Vec<OrderLineItem>>;
}

#[derive(Debug, Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    line_items: HashMap<OrderId, OrderLineItem>,
    fail_on_create: bool,
    fail_on_read: bool,
}

/// In-memory order store for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `create` fail while set.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Makes every read fail while set.
    pub async fn set_fail_on_read(&self, fail: bool) {
        self.state.write().await.fail_on_read = fail;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order, line_item: &OrderLineItem) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_create {
            return Err(OrderError::Storage("order storage offline".to_string()));
        }
        if state.orders.contains_key(&order.order_id) {
            return Err(OrderError::Storage(format!(
                "order {} already exists",
                order.order_id
            )));
        }
        state.orders.insert(order.order_id, order.clone());
        state.line_items.insert(order.order_id, *line_item);
        Ok(())
    }

    async fn find(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        if state.fail_on_read {
            return Err(OrderError::Storage("order storage offline".to_string()));
        }
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn line_item(&self, order_id: OrderId) -> Result<Option<OrderLineItem>> {
        let state = self.state.read().await;
        if state.fail_on_read {
            return Err(OrderError::Storage("order storage offline".to_string()));
        }
        Ok(state.line_items.get(&order_id).copied())
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        if !from.allows(to) {
            return Err(OrderError::InvalidStatusTransition { order_id, from, to });
        }

        let mut state = self.state.write().await;
        match state.orders.get_mut(&order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_line_items(&self) -> Result<Vec<OrderLineItem>> {
        let state = self.state.read().await;
        if state.fail_on_read {
            return Err(OrderError::Storage("order storage offline".to_string()));
        }
        Ok(state
            .orders
            .values()
            .filter(|order| order.status == OrderStatus::Pending)
            .filter_map(|order| state.line_items.get(&order.order_id).copied())
            .collect())
    }
}

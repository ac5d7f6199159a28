use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use tokio::sync::RwLock;

use crate::error::{InventoryError, Result};
use crate::stock::{ReservationRecord, ReservationStatus, RollbackOutcome, StockLevel};
use crate::store::StockStore;

#[derive(Debug, Default)]
struct State {
    stock: HashMap<ProductId, StockLevel>,
    reservations: HashMap<(OrderId, ProductId), ReservationRecord>,
    fail_on_reserve: bool,
    fail_on_rollback: bool,
}

/// In-memory stock store for tests and single-process deployments.
///
/// Each operation runs under one write lock, which stands in for a storage
/// transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes reservations fail as if storage were down.
    pub async fn set_fail_on_reserve(&self, fail: bool) {
        self.state.write().await.fail_on_reserve = fail;
    }

    /// Makes rollbacks fail as if storage were down.
    pub async fn set_fail_on_rollback(&self, fail: bool) {
        self.state.write().await.fail_on_rollback = fail;
    }

    /// Returns all reservation records.
    pub async fn reservations(&self) -> Vec<ReservationRecord> {
        self.state.read().await.reservations.values().cloned().collect()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn get(&self, product_id: ProductId) -> Result<Option<StockLevel>> {
        Ok(self.state.read().await.stock.get(&product_id).cloned())
    }

    async fn ensure(&self, product_id: ProductId, available: i64) -> Result<StockLevel> {
        let mut state = self.state.write().await;
        Ok(state
            .stock
            .entry(product_id)
            .or_insert_with(|| StockLevel::new(product_id, available))
            .clone())
    }

    async fn set_available(&self, product_id: ProductId, available: i64) -> Result<StockLevel> {
        let mut state = self.state.write().await;
        let level = state
            .stock
            .get_mut(&product_id)
            .ok_or(InventoryError::ProductNotFound(product_id))?;
        level.set_available(available);
        Ok(level.clone())
    }

    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<StockLevel> {
        let mut state = self.state.write().await;
        if state.fail_on_reserve {
            return Err(InventoryError::Unavailable("stock storage offline".to_string()));
        }

        let mut level = state
            .stock
            .get(&product_id)
            .cloned()
            .ok_or(InventoryError::ProductNotFound(product_id))?;

        if let Some(existing) = state.reservations.get(&(order_id, product_id)) {
            return match existing.status {
                ReservationStatus::RolledBack => Err(InventoryError::ReservationRolledBack {
                    order_id,
                    product_id,
                }),
                _ => Ok(level),
            };
        }

        // Work on a copy so a rejected reservation leaves the row untouched.
        level.reserve(quantity)?;
        state.stock.insert(product_id, level.clone());
        state.reservations.insert(
            (order_id, product_id),
            ReservationRecord::new(order_id, product_id, quantity),
        );
        Ok(level)
    }

    async fn rollback(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<RollbackOutcome> {
        let mut state = self.state.write().await;
        if state.fail_on_rollback {
            return Err(InventoryError::Unavailable("stock storage offline".to_string()));
        }

        let reserved = state
            .reservations
            .get(&(order_id, product_id))
            .is_some_and(|r| r.status == ReservationStatus::Reserved);
        if !reserved {
            return Ok(RollbackOutcome::Skipped);
        }

        let mut level = state
            .stock
            .get(&product_id)
            .cloned()
            .ok_or(InventoryError::ProductNotFound(product_id))?;
        level.release(quantity)?;
        state.stock.insert(product_id, level);

        if let Some(record) = state.reservations.get_mut(&(order_id, product_id)) {
            record.transition(ReservationStatus::RolledBack);
        }
        Ok(RollbackOutcome::Applied)
    }

    async fn confirm(&self, order_id: OrderId, product_id: ProductId) -> Result<StockLevel> {
        let mut state = self.state.write().await;

        let record = state
            .reservations
            .get(&(order_id, product_id))
            .cloned()
            .ok_or(InventoryError::ReservationNotFound {
                order_id,
                product_id,
            })?;
        let mut level = state
            .stock
            .get(&product_id)
            .cloned()
            .ok_or(InventoryError::ProductNotFound(product_id))?;

        match record.status {
            ReservationStatus::Confirmed => return Ok(level),
            ReservationStatus::RolledBack => {
                return Err(InventoryError::ReservationRolledBack {
                    order_id,
                    product_id,
                });
            }
            ReservationStatus::Reserved => {}
        }

        level.confirm(record.quantity)?;
        state.stock.insert(product_id, level.clone());
        if let Some(record) = state.reservations.get_mut(&(order_id, product_id)) {
            record.transition(ReservationStatus::Confirmed);
        }
        Ok(level)
    }

    async fn reservation(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Option<ReservationRecord>> {
        Ok(self
            .state
            .read()
            .await
            .reservations
            .get(&(order_id, product_id))
            .cloned())
    }

    async fn reserved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReservationRecord>> {
        let mut records: Vec<_> = self
            .state
            .read()
            .await
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Reserved && r.created_at < cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

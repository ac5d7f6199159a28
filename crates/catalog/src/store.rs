use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ProductId, RoomId};
use tokio::sync::RwLock;

use crate::error::{CatalogError, Result};
use crate::goods::{Goods, RoomGoods};

/// Read access to goods and room placements.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn goods(&self, goods_id: ProductId) -> Result<Option<Goods>>;

    /// Returns the goods with the given ids, in the order of `ids`. Unknown
    /// ids are left out.
    async fn goods_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Goods>>;

    /// Returns the placements of a room ordered by weight.
    async fn room_goods(&self, room_id: RoomId) -> Result<Vec<RoomGoods>>;
}

#[derive(Debug, Default)]
struct State {
    goods: HashMap<ProductId, Goods>,
    placements: Vec<RoomGoods>,
    unavailable: bool,
}

/// In-memory catalog for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a goods entry.
    pub async fn insert_goods(&self, goods: Goods) {
        self.state.write().await.goods.insert(goods.goods_id, goods);
    }

    /// Places goods in a room, replacing an earlier placement of the same goods.
    pub async fn place(&self, placement: RoomGoods) {
        let mut state = self.state.write().await;
        state
            .placements
            .retain(|p| !(p.room_id == placement.room_id && p.goods_id == placement.goods_id));
        state.placements.push(placement);
    }

    /// Makes every read fail while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    async fn read(&self) -> Result<tokio::sync::RwLockReadGuard<'_, State>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(CatalogError::Unavailable("catalog storage offline".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn goods(&self, goods_id: ProductId) -> Result<Option<Goods>> {
        Ok(self.read().await?.goods.get(&goods_id).cloned())
    }

    async fn goods_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Goods>> {
        let state = self.read().await?;
        Ok(ids
            .iter()
            .filter_map(|id| state.goods.get(id).cloned())
            .collect())
    }

    async fn room_goods(&self, room_id: RoomId) -> Result<Vec<RoomGoods>> {
        let state = self.read().await?;
        let mut placements: Vec<_> = state
            .placements
            .iter()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        placements.sort_by_key(|p| p.weight);
        Ok(placements)
    }
}

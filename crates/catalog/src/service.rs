use std::sync::Arc;

use common::{BuyerId, ProductId, RoomId};

use crate::error::{CatalogError, Result};
use crate::goods::{Goods, RoomGoodsList};
use crate::store::CatalogStore;

/// Product lookups used by the storefront and by order pricing.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Returns the details of one goods entry.
    ///
    /// `buyer_id` identifies who is asking; it does not change the result.
    #[tracing::instrument(skip(self))]
    pub async fn get_goods_detail(&self, goods_id: ProductId, buyer_id: BuyerId) -> Result<Goods> {
        if !goods_id.is_valid() {
            return Err(CatalogError::InvalidArgument(format!(
                "goods id must be positive, got {goods_id}"
            )));
        }

        self.store
            .goods(goods_id)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "goods lookup failed"))?
            .ok_or(CatalogError::GoodsNotFound(goods_id))
    }

    /// Lists the goods of a live room by weight, with the one being presented.
    #[tracing::instrument(skip(self))]
    pub async fn get_goods_by_room(&self, room_id: RoomId) -> Result<RoomGoodsList> {
        if !room_id.is_valid() {
            return Err(CatalogError::InvalidArgument(format!(
                "room id must be positive, got {room_id}"
            )));
        }

        let placements = self.store.room_goods(room_id).await?;
        let current_goods_id = placements
            .iter()
            .find(|p| p.is_current)
            .map(|p| p.goods_id);
        let ids: Vec<ProductId> = placements.iter().map(|p| p.goods_id).collect();
        let goods = self.store.goods_by_ids(&ids).await?;

        tracing::debug!(count = goods.len(), "room goods listed");
        Ok(RoomGoodsList {
            current_goods_id,
            goods,
        })
    }
}

#[cfg(test)]
mod tests {
    use common::Money;

    use super::*;
    use crate::goods::RoomGoods;
    use crate::store::InMemoryCatalogStore;

    async fn service() -> (CatalogService, InMemoryCatalogStore) {
        let store = InMemoryCatalogStore::new();
        for (id, title, cents) in [(1, "Tea", 1_050), (2, "Mug", 2_500), (3, "Kettle", 8_900)] {
            store
                .insert_goods(Goods::new(ProductId::new(id), title, Money::from_cents(cents)))
                .await;
        }
        (CatalogService::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn detail_returns_priced_goods() {
        let (service, _) = service().await;
        let goods = service
            .get_goods_detail(ProductId::new(1), BuyerId::new(7))
            .await
            .unwrap();

        assert_eq!(goods.title, "Tea");
        assert_eq!(goods.price.to_string(), "10.50");
    }

    #[tokio::test]
    async fn detail_rejects_non_positive_ids() {
        let (service, _) = service().await;
        for id in [0, -1] {
            let err = service
                .get_goods_detail(ProductId::new(id), BuyerId::new(7))
                .await
                .unwrap_err();
            assert!(matches!(err, CatalogError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn detail_of_unknown_goods_is_not_found() {
        let (service, _) = service().await;
        let err = service
            .get_goods_detail(ProductId::new(99), BuyerId::new(7))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::GoodsNotFound(_)));
    }

    #[tokio::test]
    async fn detail_surfaces_storage_outage() {
        let (service, store) = service().await;
        store.set_unavailable(true).await;

        let err = service
            .get_goods_detail(ProductId::new(1), BuyerId::new(7))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable(_)));
    }

    #[tokio::test]
    async fn room_listing_follows_weight_and_marks_current() {
        let (service, store) = service().await;
        let room = RoomId::new(5);
        for (goods, weight, is_current) in [(3, 30, false), (1, 10, false), (2, 20, true)] {
            store
                .place(RoomGoods {
                    room_id: room,
                    goods_id: ProductId::new(goods),
                    weight,
                    is_current,
                })
                .await;
        }

        let list = service.get_goods_by_room(room).await.unwrap();
        let titles: Vec<_> = list.goods.iter().map(|g| g.title.as_str()).collect();
        assert_eq!(titles, ["Tea", "Mug", "Kettle"]);
        assert_eq!(list.current_goods_id, Some(ProductId::new(2)));
    }

    #[tokio::test]
    async fn empty_room_lists_nothing() {
        let (service, _) = service().await;
        let list = service.get_goods_by_room(RoomId::new(8)).await.unwrap();
        assert!(list.goods.is_empty());
        assert_eq!(list.current_goods_id, None);
    }

    #[tokio::test]
    async fn room_listing_rejects_non_positive_room() {
        let (service, _) = service().await;
        let err = service.get_goods_by_room(RoomId::new(0)).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidArgument(_)));
    }
}

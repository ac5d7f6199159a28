use common::{Money, ProductId, RoomId};
use serde::{Deserialize, Serialize};

/// Sale status of a goods entry. Values match the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodsStatus {
    OffShelf = 0,
    OnSale = 1,
}

impl GoodsStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Unknown values read as off shelf.
    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => GoodsStatus::OnSale,
            _ => GoodsStatus::OffShelf,
        }
    }
}

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goods {
    pub goods_id: ProductId,
    pub category_id: i64,
    pub brand_name: String,
    pub title: String,
    /// List price shown struck through.
    pub market_price: Money,
    /// Price actually charged per unit.
    pub price: Money,
    pub brief: String,
    pub head_imgs: Vec<String>,
    pub status: GoodsStatus,
}

impl Goods {
    /// Creates an on-sale goods entry with the given title and unit price.
    pub fn new(goods_id: ProductId, title: impl Into<String>, price: Money) -> Self {
        Self {
            goods_id,
            category_id: 0,
            brand_name: String::new(),
            title: title.into(),
            market_price: price,
            price,
            brief: String::new(),
            head_imgs: Vec::new(),
            status: GoodsStatus::OnSale,
        }
    }
}

/// Placement of a goods entry in a live room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomGoods {
    pub room_id: RoomId,
    pub goods_id: ProductId,
    /// Lower weights are listed first.
    pub weight: i64,
    /// Whether the host is presenting these goods right now.
    pub is_current: bool,
}

/// Goods of a live room, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomGoodsList {
    pub current_goods_id: Option<ProductId>,
    pub goods: Vec<Goods>,
}

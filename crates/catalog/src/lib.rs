//! Goods catalog.
//!
//! Read-mostly product data: goods details used to price orders, and the
//! goods placed in each live room.

pub mod error;
pub mod goods;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::{CatalogError, Result};
pub use goods::{Goods, GoodsStatus, RoomGoods, RoomGoodsList};
pub use postgres::PostgresCatalogStore;
pub use service::CatalogService;
pub use store::{CatalogStore, InMemoryCatalogStore};

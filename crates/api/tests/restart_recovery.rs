//! Restarting the services over durable stores.
//!
//! Delayed pay timeouts die with the in-memory broker, so a second start
//! over the same stores has to re-drive them.

use std::sync::Arc;
use std::time::Duration;

use api::{Backends, Config, Services};
use catalog::{Goods, InMemoryCatalogStore};
use common::{BuyerId, Money, OrderId, ProductId};
use inventory::{InMemoryLockManager, InMemoryStockStore};
use order::{CreateOrder, InMemoryOrderStore, OrderStatus};

const PRODUCT: ProductId = ProductId::new(42);

async fn backends() -> Backends {
    let catalog = InMemoryCatalogStore::new();
    catalog
        .insert_goods(Goods::new(PRODUCT, "Green tea", Money::from_cents(250)))
        .await;
    Backends {
        catalog: Arc::new(catalog),
        stock: Arc::new(InMemoryStockStore::new()),
        lock: Arc::new(InMemoryLockManager::new()),
        orders: Arc::new(InMemoryOrderStore::new()),
    }
}

fn config() -> Config {
    Config {
        recovery_grace: Duration::ZERO,
        ..Config::default()
    }
}

async fn stock(services: &Services) -> (i64, i64) {
    let level = services.state.inventory.get(PRODUCT).await.unwrap();
    (level.available, level.locked)
}

async fn status(services: &Services, order_id: OrderId) -> OrderStatus {
    services
        .state
        .orders
        .find(order_id)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test(start_paused = true)]
async fn restart_reschedules_timeouts_and_releases_orphans() {
    let backends = backends().await;

    let first = Services::start(&config(), backends.clone()).await.unwrap();
    first.state.inventory.register(PRODUCT, 10).await.unwrap();
    let created = first
        .state
        .coordinator
        .create_order(CreateOrder::new(BuyerId::new(7), PRODUCT, 3))
        .await
        .unwrap();
    // Reserved, then the process died before the order was saved.
    first
        .state
        .inventory
        .reserve(PRODUCT, 2, OrderId::new(999))
        .await
        .unwrap();
    first.shutdown().await;

    // The pay timeout went down with the first broker.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let second = Services::start(&config(), backends).await.unwrap();
    assert_eq!(status(&second, created.order_id).await, OrderStatus::Pending);
    assert_eq!(second.recovered.timeouts_rescheduled, 1);
    assert_eq!(second.recovered.reservations_released, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stock(&second).await, (7, 3));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(status(&second, created.order_id).await, OrderStatus::Closed);
    assert_eq!(stock(&second).await, (10, 0));

    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn restart_leaves_settled_orders_alone() {
    let backends = backends().await;

    let first = Services::start(&config(), backends.clone()).await.unwrap();
    first.state.inventory.register(PRODUCT, 10).await.unwrap();
    let created = first
        .state
        .coordinator
        .create_order(CreateOrder::new(BuyerId::new(7), PRODUCT, 4))
        .await
        .unwrap();
    first.state.coordinator.pay_order(created.order_id).await.unwrap();
    first.shutdown().await;

    let second = Services::start(&config(), backends).await.unwrap();
    assert_eq!(second.recovered.timeouts_rescheduled, 0);
    assert_eq!(second.recovered.reservations_released, 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(status(&second, created.order_id).await, OrderStatus::Paid);
    assert_eq!(stock(&second).await, (6, 0));

    second.shutdown().await;
}

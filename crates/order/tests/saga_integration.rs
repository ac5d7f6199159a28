//! End-to-end tests of the order saga over the in-memory broker.
//!
//! Every service runs in-process: catalog, inventory ledger, order
//! coordinator, the inventory rollback consumer and the pay-timeout reaper.
//! The clock is paused so delayed messages can be fast-forwarded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{
    BrokerConfig, ConsumerConfig, DEFAULT_SEND_RETRIES, InMemoryBroker, Message, MessageBroker,
    Producer, PushConsumer,
};
use catalog::{CatalogService, Goods, InMemoryCatalogStore};
use common::{
    BuyerId, DEFAULT_EPOCH, IdGenerator, Money, OrderId, ProductId, StockMessage,
    TOPIC_INVENTORY_ROLLBACK, TOPIC_ORDER_PAY_TIMEOUT,
};
use inventory::{
    InMemoryLockManager, InMemoryStockStore, InventoryLedger, ROLLBACK_CONSUMER_GROUP,
    ReservationStatus, RollbackHandler,
};
use order::{
    CreateOrder, InMemoryOrderStore, InventoryClient, LocalCatalogClient, LocalInventoryClient,
    OrderError, OrderSagaCoordinator, OrderStatus, OrderStore, PAY_TIMEOUT_CONSUMER_GROUP,
    RpcError, ShippingInfo, TimeoutReaper,
};

const PRODUCT: ProductId = ProductId::new(42);
const BUYER: BuyerId = BuyerId::new(7);

struct TestHarness {
    coordinator: OrderSagaCoordinator,
    broker: InMemoryBroker,
    producer: Producer,
    orders: InMemoryOrderStore,
    ledger: InventoryLedger,
    catalog: CatalogService,
}

/// Reserves through the ledger but loses every confirmation after a delay.
struct SlowFailingConfirm(LocalInventoryClient);

#[async_trait]
impl InventoryClient for SlowFailingConfirm {
    async fn reserve(
        &self,
        product_id: ProductId,
        quantity: i64,
        order_id: OrderId,
    ) -> Result<i64, RpcError> {
        self.0.reserve(product_id, quantity, order_id).await
    }

    async fn confirm(&self, _order_id: OrderId, _product_id: ProductId) -> Result<(), RpcError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Err(RpcError::Unavailable("inventory restarting".into()))
    }
}

impl TestHarness {
    async fn new() -> Self {
        let broker = InMemoryBroker::with_config(BrokerConfig {
            check_immunity: Duration::ZERO,
            ..BrokerConfig::default()
        });
        let producer = Producer::new(Arc::new(broker.clone()), DEFAULT_SEND_RETRIES);

        let catalog = InMemoryCatalogStore::new();
        catalog
            .insert_goods(Goods::new(PRODUCT, "Oolong tea", Money::from_cents(250)))
            .await;

        let ledger = InventoryLedger::new(
            Arc::new(InMemoryStockStore::new()),
            Arc::new(InMemoryLockManager::new()),
        );
        ledger.register(PRODUCT, 10).await.unwrap();

        let orders = InMemoryOrderStore::new();
        let catalog = CatalogService::new(Arc::new(catalog));
        let coordinator = OrderSagaCoordinator::new(
            Arc::new(IdGenerator::new(DEFAULT_EPOCH, 1).unwrap()),
            Arc::new(orders.clone()),
            Arc::new(LocalCatalogClient::new(catalog.clone())),
            Arc::new(LocalInventoryClient::new(ledger.clone())),
            producer.clone(),
        );

        PushConsumer::start(
            Arc::new(broker.clone()),
            ConsumerConfig::new(TOPIC_INVENTORY_ROLLBACK, ROLLBACK_CONSUMER_GROUP),
            Arc::new(RollbackHandler::new(ledger.clone())),
        )
        .await
        .unwrap();
        PushConsumer::start(
            Arc::new(broker.clone()),
            ConsumerConfig::new(TOPIC_ORDER_PAY_TIMEOUT, PAY_TIMEOUT_CONSUMER_GROUP),
            Arc::new(TimeoutReaper::new(Arc::new(orders.clone()), producer.clone())),
        )
        .await
        .unwrap();

        Self {
            coordinator,
            broker,
            producer,
            orders,
            ledger,
            catalog,
        }
    }

    /// A second coordinator over the same stores, talking to `inventory`.
    fn coordinator_with(&self, inventory: impl InventoryClient + 'static) -> OrderSagaCoordinator {
        OrderSagaCoordinator::new(
            Arc::new(IdGenerator::new(DEFAULT_EPOCH, 2).unwrap()),
            Arc::new(self.orders.clone()),
            Arc::new(LocalCatalogClient::new(self.catalog.clone())),
            Arc::new(inventory),
            self.producer.clone(),
        )
    }

    fn request(quantity: i64) -> CreateOrder {
        CreateOrder::new(BUYER, PRODUCT, quantity).with_shipping(ShippingInfo::new(
            "1 Harbour Rd",
            "Lin",
            "555-0199",
        ))
    }

    async fn stock(&self) -> (i64, i64) {
        let level = self.ledger.get(PRODUCT).await.unwrap();
        (level.available, level.locked)
    }

    async fn status(&self, order_id: OrderId) -> OrderStatus {
        self.orders.find(order_id).await.unwrap().unwrap().status
    }

    async fn reservation(&self, order_id: OrderId) -> ReservationStatus {
        self.ledger
            .reservation(order_id, PRODUCT)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

/// Lets consumers drain what has been delivered so far.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Moves past the pay-timeout tier (5s).
async fn past_pay_timeout() {
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn created_order_holds_stock_and_discards_compensation() {
    let h = TestHarness::new().await;

    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();
    settle().await;

    assert_eq!(created.pay_amount, Money::from_cents(1_000));
    assert_eq!(created.status, OrderStatus::Pending);
    assert_eq!(h.stock().await, (6, 4));
    assert_eq!(h.reservation(created.order_id).await, ReservationStatus::Reserved);
    assert_eq!(h.broker.half_message_count().await, 0);
    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 0);

    let order = h.orders.find(created.order_id).await.unwrap().unwrap();
    assert_eq!(order.buyer_id, BUYER);
    assert_eq!(order.shipping.name, "Lin");
    let item = h.orders.line_item(created.order_id).await.unwrap().unwrap();
    assert_eq!((item.product_id, item.quantity), (PRODUCT, 4));
}

#[tokio::test(start_paused = true)]
async fn failed_persistence_releases_reserved_stock() {
    let h = TestHarness::new().await;
    h.orders.set_fail_on_create(true).await;

    let err = h.coordinator.create_order(TestHarness::request(4)).await.unwrap_err();
    settle().await;

    assert!(matches!(err, OrderError::Internal(_)));
    assert_eq!(err.client_message(), "internal error");
    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 1);
    assert_eq!(h.stock().await, (10, 0));
    assert!(h.orders.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn failed_pay_timeout_schedule_releases_reserved_stock() {
    let h = TestHarness::new().await;
    h.broker.set_fail_on_publish(TOPIC_ORDER_PAY_TIMEOUT, true).await;

    let err = h.coordinator.create_order(TestHarness::request(3)).await.unwrap_err();
    settle().await;

    assert!(matches!(err, OrderError::Internal(_)));
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn refused_reservation_stages_nothing() {
    let h = TestHarness::new().await;

    let err = h.coordinator.create_order(TestHarness::request(11)).await.unwrap_err();
    settle().await;

    assert!(matches!(err, OrderError::InsufficientStock(_)));
    assert_eq!(h.stock().await, (10, 0));
    assert_eq!(h.broker.half_message_count().await, 0);
    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 0);
    assert!(h.orders.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn unknown_goods_is_a_bad_request() {
    let h = TestHarness::new().await;

    let err = h
        .coordinator
        .create_order(CreateOrder::new(BUYER, ProductId::new(999), 1))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::InvalidArgument(_)));
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn unpaid_order_is_closed_and_stock_released() {
    let h = TestHarness::new().await;
    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();

    past_pay_timeout().await;

    assert_eq!(h.status(created.order_id).await, OrderStatus::Closed);
    assert_eq!(h.reservation(created.order_id).await, ReservationStatus::RolledBack);
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn redelivered_timeout_for_closed_order_changes_nothing() {
    let h = TestHarness::new().await;
    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();
    past_pay_timeout().await;
    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 1);

    let duplicate = StockMessage::new(created.order_id, PRODUCT, 4);
    h.producer
        .send(Message::json(TOPIC_ORDER_PAY_TIMEOUT, &duplicate).unwrap())
        .await
        .unwrap();
    settle().await;

    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 1);
    assert_eq!(h.status(created.order_id).await, OrderStatus::Closed);
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn concurrent_orders_never_oversell() {
    let h = TestHarness::new().await;

    let (a, b) = tokio::join!(
        h.coordinator.create_order(TestHarness::request(6)),
        h.coordinator.create_order(TestHarness::request(6)),
    );
    settle().await;

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(OrderError::InsufficientStock(_)))));
    assert_eq!(h.stock().await, (4, 6));
    assert_eq!(h.orders.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn paid_order_keeps_its_stock_past_the_timeout() {
    let h = TestHarness::new().await;
    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();

    let paid = h.coordinator.pay_order(created.order_id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(h.reservation(created.order_id).await, ReservationStatus::Confirmed);
    assert_eq!(h.stock().await, (6, 0));

    past_pay_timeout().await;

    assert_eq!(h.status(created.order_id).await, OrderStatus::Paid);
    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 0);
    assert_eq!(h.stock().await, (6, 0));
}

#[tokio::test(start_paused = true)]
async fn payment_after_timeout_is_refused() {
    let h = TestHarness::new().await;
    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();
    past_pay_timeout().await;

    let err = h.coordinator.pay_order(created.order_id).await.unwrap_err();

    assert!(matches!(
        err,
        OrderError::InvalidStatusTransition {
            from: OrderStatus::Closed,
            to: OrderStatus::Paid,
            ..
        }
    ));
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn payment_racing_a_released_reservation_closes_the_order() {
    let h = TestHarness::new().await;
    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();

    // The timeout released the stock but crashed before closing the order.
    h.ledger.rollback(created.order_id, PRODUCT, 4).await.unwrap();

    let err = h.coordinator.pay_order(created.order_id).await.unwrap_err();
    assert!(matches!(err, OrderError::InvalidStatusTransition { .. }));
    assert_eq!(h.status(created.order_id).await, OrderStatus::Closed);
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn order_reopened_after_its_timeout_fired_is_still_closed() {
    let h = TestHarness::new().await;
    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();
    let flaky = h.coordinator_with(SlowFailingConfirm(LocalInventoryClient::new(h.ledger.clone())));

    // The timeout fires while the payment holds the order as paid.
    tokio::time::sleep(Duration::from_millis(4_900)).await;
    let err = flaky.pay_order(created.order_id).await.unwrap_err();
    assert!(matches!(err, OrderError::Downstream(RpcError::Unavailable(_))));
    assert_eq!(h.status(created.order_id).await, OrderStatus::Pending);
    assert_eq!(h.stock().await, (6, 4));

    past_pay_timeout().await;

    assert_eq!(h.status(created.order_id).await, OrderStatus::Closed);
    assert_eq!(h.reservation(created.order_id).await, ReservationStatus::RolledBack);
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn lost_outcome_for_created_order_is_discarded_on_check_back() {
    let h = TestHarness::new().await;
    h.broker.set_fail_on_end_transaction(true).await;

    let created = h.coordinator.create_order(TestHarness::request(4)).await.unwrap();
    assert_eq!(h.broker.half_message_count().await, 1);

    assert_eq!(h.broker.check_pending().await, 1);
    settle().await;

    assert_eq!(h.broker.half_message_count().await, 0);
    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 0);
    assert_eq!(h.reservation(created.order_id).await, ReservationStatus::Reserved);
    assert_eq!(h.stock().await, (6, 4));
}

#[tokio::test(start_paused = true)]
async fn lost_outcome_for_unsaved_order_is_committed_on_check_back() {
    let h = TestHarness::new().await;
    h.broker.set_fail_on_end_transaction(true).await;
    h.orders.set_fail_on_create(true).await;

    h.coordinator.create_order(TestHarness::request(4)).await.unwrap_err();
    assert_eq!(h.stock().await, (6, 4));

    assert_eq!(h.broker.check_pending().await, 1);
    settle().await;

    assert_eq!(h.broker.delivered_count(TOPIC_INVENTORY_ROLLBACK).await, 1);
    assert_eq!(h.stock().await, (10, 0));
}

#[tokio::test(start_paused = true)]
async fn broker_shutdown_rejects_new_orders() {
    let h = TestHarness::new().await;
    h.broker.shutdown().await.unwrap();

    let err = h.coordinator.create_order(TestHarness::request(1)).await.unwrap_err();

    assert!(matches!(err, OrderError::Broker(_)));
    assert_eq!(h.stock().await, (10, 0));
}

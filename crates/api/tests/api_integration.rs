//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::{AppState, Backends, Config, Services};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use catalog::{Goods, InMemoryCatalogStore, RoomGoods};
use common::{Money, ProductId, RoomId};
use inventory::{InMemoryLockManager, InMemoryStockStore};
use metrics_exporter_prometheus::PrometheusHandle;
use order::InMemoryOrderStore;
use tower::ServiceExt;

const PRODUCT: i64 = 42;
const ROOM: i64 = 9;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Product 42 priced at 2.50 with 10 in stock, listed in room 9.
async fn setup_with_state() -> (axum::Router, Arc<AppState>) {
    let catalog = Arc::new(InMemoryCatalogStore::new());
    catalog
        .insert_goods(Goods::new(
            ProductId::new(PRODUCT),
            "Green tea",
            Money::from_cents(250),
        ))
        .await;
    catalog
        .place(RoomGoods {
            room_id: RoomId::new(ROOM),
            goods_id: ProductId::new(PRODUCT),
            weight: 1,
            is_current: true,
        })
        .await;

    let backends = Backends {
        catalog,
        stock: Arc::new(InMemoryStockStore::new()),
        lock: Arc::new(InMemoryLockManager::new()),
        orders: Arc::new(InMemoryOrderStore::new()),
    };
    let services = Services::start(&Config::default(), backends).await.unwrap();
    services
        .state
        .inventory
        .register(ProductId::new(PRODUCT), 10)
        .await
        .unwrap();

    let state = services.state.clone();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn setup() -> axum::Router {
    setup_with_state().await.0
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn create_order_request(buyer_id: i64, quantity: i64) -> Request<Body> {
    with_json(
        "POST",
        "/orders",
        serde_json::json!({
            "buyer_id": buyer_id,
            "product_id": PRODUCT,
            "quantity": quantity,
            "address": "1 Tea Street",
            "name": "Ann",
            "phone": "555-0100"
        }),
    )
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_order() {
    let (app, state) = setup_with_state().await;

    let (status, json) = send(&app, create_order_request(7, 2)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "Pending");
    assert_eq!(json["pay_amount_cents"], 500);
    assert!(json["order_id"].as_i64().unwrap() > 0);

    let level = state.inventory.get(ProductId::new(PRODUCT)).await.unwrap();
    assert_eq!(level.available, 8);
    assert_eq!(level.locked, 2);
}

#[tokio::test]
async fn test_create_and_get_order() {
    let app = setup().await;

    let (_, created) = send(&app, create_order_request(7, 3)).await;
    let order_id = created["order_id"].as_i64().unwrap();

    let (status, order) = send(&app, get(&format!("/orders/{order_id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["order_id"], order_id);
    assert_eq!(order["buyer_id"], 7);
    assert_eq!(order["status"], "Pending");
    assert_eq!(order["status_code"], 100);
    assert_eq!(order["pay_amount_cents"], 750);
    assert_eq!(order["address"], "1 Tea Street");
    assert_eq!(order["line_item"]["product_id"], PRODUCT);
    assert_eq!(order["line_item"]["quantity"], 3);
}

#[tokio::test]
async fn test_pay_order() {
    let (app, state) = setup_with_state().await;

    let (_, created) = send(&app, create_order_request(7, 1)).await;
    let order_id = created["order_id"].as_i64().unwrap();

    let (status, paid) = send(
        &app,
        with_json("POST", &format!("/orders/{order_id}/pay"), serde_json::json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "Paid");
    assert_eq!(paid["status_code"], 200);

    // Paying twice is a conflict.
    let (status, _) = send(
        &app,
        with_json("POST", &format!("/orders/{order_id}/pay"), serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let level = state.inventory.get(ProductId::new(PRODUCT)).await.unwrap();
    assert_eq!(level.available, 9);
    assert_eq!(level.locked, 0);
}

#[tokio::test]
async fn test_create_order_with_insufficient_stock() {
    let (app, state) = setup_with_state().await;

    let (status, json) = send(&app, create_order_request(7, 11)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().is_some());

    let level = state.inventory.get(ProductId::new(PRODUCT)).await.unwrap();
    assert_eq!(level.available, 10);
    assert_eq!(level.locked, 0);
}

#[tokio::test]
async fn test_create_order_with_invalid_buyer() {
    let app = setup().await;

    let (status, json) = send(&app, create_order_request(0, 1)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("buyer"));
}

#[tokio::test]
async fn test_create_order_for_unknown_goods() {
    let app = setup().await;

    let (status, _) = send(
        &app,
        with_json(
            "POST",
            "/orders",
            serde_json::json!({ "buyer_id": 7, "product_id": 404, "quantity": 1 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = setup().await;

    let (status, _) = send(&app, get("/orders/123456")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/orders/not-a-number")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pay_nonexistent_order() {
    let app = setup().await;

    let (status, _) = send(
        &app,
        with_json("POST", "/orders/123456/pay", serde_json::json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_goods_detail() {
    let app = setup().await;

    let (status, json) = send(&app, get(&format!("/goods/{PRODUCT}?buyer_id=7"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["goods_id"], PRODUCT);
    assert_eq!(json["title"], "Green tea");
    assert_eq!(json["price_cents"], 250);
    assert_eq!(json["on_sale"], true);

    let (status, _) = send(&app, get("/goods/404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/goods/0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_room_goods() {
    let app = setup().await;

    let (status, json) = send(&app, get(&format!("/rooms/{ROOM}/goods"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["current_goods_id"], PRODUCT);
    assert_eq!(json["goods"].as_array().unwrap().len(), 1);
    assert_eq!(json["goods"][0]["title"], "Green tea");
}

#[tokio::test]
async fn test_stock_endpoints() {
    let app = setup().await;

    let (status, json) = send(&app, get(&format!("/stock/{PRODUCT}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 10);

    let (status, json) = send(
        &app,
        with_json(
            "PUT",
            &format!("/stock/{PRODUCT}"),
            serde_json::json!({ "quantity": 20 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 20);

    let (status, json) = send(
        &app,
        with_json(
            "POST",
            &format!("/stock/{PRODUCT}/reduce"),
            serde_json::json!({ "quantity": 4, "order_id": 777 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 16);
    assert_eq!(json["locked"], 4);

    // The same (order, product) reservation again changes nothing.
    let (status, json) = send(
        &app,
        with_json(
            "POST",
            &format!("/stock/{PRODUCT}/reduce"),
            serde_json::json!({ "quantity": 4, "order_id": 777 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 16);

    let (status, _) = send(
        &app,
        with_json(
            "POST",
            &format!("/stock/{PRODUCT}/reduce"),
            serde_json::json!({ "quantity": 100, "order_id": 778 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_stock_is_not_found() {
    let app = setup().await;

    let (status, _) = send(&app, get("/stock/404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Overwriting stock of an unknown product is a client error.
    let (status, _) = send(
        &app,
        with_json("PUT", "/stock/404", serde_json::json!({ "quantity": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;
    let (status, _) = send(&app, create_order_request(7, 1)).await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_created_total"));
}

//! HTTP gateway with observability for the order platform.
//!
//! Exposes order creation and payment, the goods catalog and the inventory
//! ledger as REST endpoints, with structured logging (tracing) and
//! Prometheus metrics.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use broker::Producer;
use catalog::CatalogService;
use inventory::InventoryLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use order::{OrderSagaCoordinator, OrderStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use bootstrap::{Backends, BootstrapError, Services};
pub use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: OrderSagaCoordinator,
    pub orders: Arc<dyn OrderStore>,
    pub catalog: CatalogService,
    pub inventory: InventoryLedger,
    pub producer: Producer,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/pay", post(routes::orders::pay))
        .route("/goods/{id}", get(routes::goods::detail))
        .route("/rooms/{id}/goods", get(routes::goods::by_room))
        .route(
            "/stock/{id}",
            get(routes::stock::get).put(routes::stock::set),
        )
        .route("/stock/{id}/reduce", post(routes::stock::reduce))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

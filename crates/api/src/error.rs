//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use catalog::CatalogError;
use inventory::InventoryError;
use order::OrderError;

/// Body text of every 5xx response. Details only go to the log.
const INTERNAL_ERROR: &str = "internal error";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order service error.
    Order(OrderError),
    /// Catalog error.
    Catalog(CatalogError),
    /// Inventory error.
    Inventory(InventoryError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Order(err) => order_error_to_response(err),
            ApiError::Catalog(err) => catalog_error_to_response(err),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Internal(msg) => internal(msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn internal(detail: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!(error = %detail, "internal server error");
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_string())
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    match &err {
        OrderError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, err.client_message()),
        OrderError::NotFound(_) => (StatusCode::NOT_FOUND, err.client_message()),
        OrderError::InvalidStatusTransition { .. } | OrderError::InsufficientStock(_) => {
            (StatusCode::CONFLICT, err.client_message())
        }
        _ => internal(err),
    }
}

fn catalog_error_to_response(err: CatalogError) -> (StatusCode, String) {
    match &err {
        CatalogError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        CatalogError::GoodsNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        _ => internal(err),
    }
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, String) {
    match &err {
        InventoryError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        InventoryError::ProductNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        InventoryError::InsufficientStock { .. } | InventoryError::ReservationRolledBack { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ => internal(err),
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Catalog(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

use common::ProductId;
use thiserror::Error;

/// Errors that can occur when reading the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The request failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No goods exist with the given id.
    #[error("Goods not found: {0}")]
    GoodsNotFound(ProductId),

    /// Catalog storage could not be reached.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

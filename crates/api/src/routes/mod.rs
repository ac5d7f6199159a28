pub mod goods;
pub mod ops;
pub mod orders;
pub mod stock;

use crate::error::ApiError;

/// Parses a numeric path segment.
fn parse_id(kind: &str, raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {kind} id '{raw}': {e}")))
}

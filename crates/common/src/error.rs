//! Errors raised by shared infrastructure.

use thiserror::Error;

/// Errors that can occur when configuring the id generator.
#[derive(Debug, Error)]
pub enum IdError {
    /// Machine id does not fit the reserved bits.
    #[error("Invalid machine id {machine_id}: must be between 0 and {max}")]
    InvalidMachineId { machine_id: i64, max: i64 },

    /// Epoch could not be used as the id time origin.
    #[error("Invalid epoch '{epoch}': {reason}")]
    InvalidEpoch { epoch: String, reason: String },
}

//! Snowflake-style order id generation.
//!
//! Layout of a generated id (most significant bit first):
//!
//! ```text
//! 0 | 41 bits: millis since epoch | 10 bits: machine id | 12 bits: sequence
//! ```

use std::sync::{Mutex, PoisonError};

use chrono::{NaiveDate, NaiveTime, Utc};

use crate::error::IdError;
use crate::types::OrderId;

/// Epoch used when none is configured.
pub const DEFAULT_EPOCH: &str = "2023-08-28";

const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_MACHINE_ID: i64 = (1 << MACHINE_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u32 = MACHINE_BITS + SEQUENCE_BITS;

#[derive(Debug, Default)]
struct GeneratorState {
    last_ms: i64,
    sequence: i64,
}

/// Generates globally unique, time-ordered order ids.
///
/// Safe to share between tasks; distinct service instances must be
/// configured with distinct machine ids.
#[derive(Debug)]
pub struct IdGenerator {
    epoch_ms: i64,
    machine_id: i64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Creates a generator for `machine_id` counting from `epoch` (`YYYY-MM-DD`, UTC).
    pub fn new(epoch: &str, machine_id: i64) -> Result<Self, IdError> {
        if !(0..=MAX_MACHINE_ID).contains(&machine_id) {
            return Err(IdError::InvalidMachineId {
                machine_id,
                max: MAX_MACHINE_ID,
            });
        }

        let epoch = if epoch.is_empty() { DEFAULT_EPOCH } else { epoch };
        let date = NaiveDate::parse_from_str(epoch, "%Y-%m-%d").map_err(|e| {
            IdError::InvalidEpoch {
                epoch: epoch.to_string(),
                reason: e.to_string(),
            }
        })?;
        let epoch_ms = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();

        if epoch_ms > Utc::now().timestamp_millis() {
            return Err(IdError::InvalidEpoch {
                epoch: epoch.to_string(),
                reason: "epoch lies in the future".to_string(),
            });
        }

        Ok(Self {
            epoch_ms,
            machine_id,
            state: Mutex::new(GeneratorState::default()),
        })
    }

    /// Returns the configured machine id.
    pub fn machine_id(&self) -> i64 {
        self.machine_id
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> OrderId {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // Never go backwards, even if the wall clock does.
        let mut now = (Utc::now().timestamp_millis() - self.epoch_ms).max(state.last_ms);

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond: borrow the next one.
                now = state.last_ms + 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        OrderId::new((now << TIMESTAMP_SHIFT) | (self.machine_id << SEQUENCE_BITS) | state.sequence)
    }

    /// Splits an id into `(millis since epoch, machine id, sequence)`.
    pub fn decompose(id: OrderId) -> (i64, i64, i64) {
        let raw = id.as_i64();
        (
            raw >> TIMESTAMP_SHIFT,
            (raw >> SEQUENCE_BITS) & MAX_MACHINE_ID,
            raw & SEQUENCE_MASK,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rejects_out_of_range_machine_id() {
        assert!(matches!(
            IdGenerator::new(DEFAULT_EPOCH, 1024),
            Err(IdError::InvalidMachineId { .. })
        ));
        assert!(matches!(
            IdGenerator::new(DEFAULT_EPOCH, -1),
            Err(IdError::InvalidMachineId { .. })
        ));
    }

    #[test]
    fn rejects_malformed_or_future_epoch() {
        assert!(matches!(
            IdGenerator::new("28/08/2023", 1),
            Err(IdError::InvalidEpoch { .. })
        ));
        assert!(matches!(
            IdGenerator::new("2999-01-01", 1),
            Err(IdError::InvalidEpoch { .. })
        ));
    }

    #[test]
    fn empty_epoch_falls_back_to_default() {
        assert!(IdGenerator::new("", 1).is_ok());
    }

    #[test]
    fn ids_are_positive_and_strictly_increasing() {
        let ids = IdGenerator::new(DEFAULT_EPOCH, 3).unwrap();
        let mut previous = ids.next_id();
        assert!(previous.is_valid());
        for _ in 0..10_000 {
            let next = ids.next_id();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn decompose_recovers_machine_id() {
        let ids = IdGenerator::new(DEFAULT_EPOCH, 17).unwrap();
        let (millis, machine, _) = IdGenerator::decompose(ids.next_id());
        assert_eq!(machine, 17);
        assert!(millis > 0);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let ids = Arc::new(IdGenerator::new(DEFAULT_EPOCH, 1).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..2_000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 16_000);
    }
}

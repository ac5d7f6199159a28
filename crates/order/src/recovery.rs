//! Startup sweep that rebuilds compensation lost with the broker's timers.
//!
//! Pay timeouts and half messages only live inside the broker process, while
//! orders and reservations may be durable. After a restart the sweep puts
//! every pending order back on a pay timeout and settles reservations whose
//! order can no longer settle them.

use std::sync::Arc;
use std::time::Duration;

use broker::{DelayLevel, Message, Producer};
use common::{StockMessage, TOPIC_INVENTORY_ROLLBACK, TOPIC_ORDER_PAY_TIMEOUT};
use inventory::{InventoryLedger, ReservationRecord};

use crate::error::{OrderError, Result};
use crate::order::OrderStatus;
use crate::store::OrderStore;

/// Reservations younger than this may belong to an order still being created.
pub const DEFAULT_RECOVERY_GRACE: Duration = Duration::from_secs(60);

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pending orders given a fresh pay timeout.
    pub timeouts_rescheduled: usize,
    /// Reservations sent back to the rollback topic.
    pub reservations_released: usize,
    /// Reservations of paid orders confirmed.
    pub reservations_confirmed: usize,
}

/// Re-drives the compensation of orders and reservations left behind by a
/// previous process.
pub struct RecoverySweep {
    orders: Arc<dyn OrderStore>,
    ledger: InventoryLedger,
    producer: Producer,
    pay_timeout: DelayLevel,
    grace: Duration,
}

impl RecoverySweep {
    pub fn new(orders: Arc<dyn OrderStore>, ledger: InventoryLedger, producer: Producer) -> Self {
        Self {
            orders,
            ledger,
            producer,
            pay_timeout: DelayLevel::at_least(Duration::from_secs(5)),
            grace: DEFAULT_RECOVERY_GRACE,
        }
    }

    pub fn with_pay_timeout(mut self, pay_timeout: DelayLevel) -> Self {
        self.pay_timeout = pay_timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Runs the sweep once.
    ///
    /// A pending order gets a full pay window again; the tier ladder cannot
    /// express the remainder of the old one.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        // 1. Pending orders lost their pay timeout
        for item in self.orders.pending_line_items().await? {
            let payload = StockMessage::new(item.order_id, item.product_id, item.quantity);
            let timeout =
                Message::json(TOPIC_ORDER_PAY_TIMEOUT, &payload)?.with_delay(self.pay_timeout);
            self.producer.send(timeout).await?;
            report.timeouts_rescheduled += 1;
        }

        // 2. Held stock whose order will never release or confirm it
        let stale = self
            .ledger
            .stale_reservations(self.grace)
            .await
            .map_err(|e| OrderError::Downstream(e.into()))?;
        for record in stale {
            let status = self.orders.find(record.order_id).await?.map(|o| o.status);
            match status {
                Some(OrderStatus::Pending) => {}
                Some(OrderStatus::Paid) => {
                    self.ledger
                        .confirm(record.order_id, record.product_id)
                        .await
                        .map_err(|e| OrderError::Downstream(e.into()))?;
                    report.reservations_confirmed += 1;
                }
                Some(OrderStatus::Closed) | None => {
                    self.release(&record).await?;
                    report.reservations_released += 1;
                }
            }
        }

        tracing::info!(
            timeouts_rescheduled = report.timeouts_rescheduled,
            reservations_released = report.reservations_released,
            reservations_confirmed = report.reservations_confirmed,
            "recovery sweep finished"
        );
        Ok(report)
    }

    async fn release(&self, record: &ReservationRecord) -> Result<()> {
        tracing::warn!(
            order_id = %record.order_id,
            product_id = %record.product_id,
            quantity = record.quantity,
            "releasing orphaned reservation"
        );
        let payload = StockMessage::new(record.order_id, record.product_id, record.quantity);
        self.producer
            .send(Message::json(TOPIC_INVENTORY_ROLLBACK, &payload)?)
            .await?;
        Ok(())
    }
}

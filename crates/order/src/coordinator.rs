//! Order creation and payment.
//!
//! Creating an order reserves stock in the inventory service. The
//! reservation is backed by a transactional message on the inventory
//! rollback topic: the message is staged before anything happens and only
//! committed (released to the inventory service as compensation) when the
//! order could not be completed after stock was reserved. The happy path
//! discards it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use broker::{
    DelayLevel, LocalTransaction, LocalTransactionState, Message, Producer, TransactionProducer,
};
use common::{
    IdGenerator, OrderId, StockMessage, TOPIC_INVENTORY_ROLLBACK, TOPIC_ORDER_PAY_TIMEOUT,
};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::checker::OrderTransactionChecker;
use crate::clients::{CatalogClient, InventoryClient, RpcError};
use crate::error::{OrderError, Result};
use crate::order::{CreateOrder, Order, OrderLineItem, OrderResult, OrderStatus};
use crate::store::OrderStore;

/// Default deadline for each call to another service.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Tunables of the order saga.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Delay tier of the pay-timeout message (level 2, 5s, by default).
    pub pay_timeout: DelayLevel,
    /// Deadline for each catalog or inventory call.
    pub rpc_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pay_timeout: DelayLevel::at_least(Duration::from_secs(5)),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// Drives order creation against the catalog, the inventory and the broker.
#[derive(Clone)]
pub struct OrderSagaCoordinator {
    ids: Arc<IdGenerator>,
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogClient>,
    inventory: Arc<dyn InventoryClient>,
    producer: Producer,
    transactions: TransactionProducer,
    config: CoordinatorConfig,
}

impl OrderSagaCoordinator {
    /// Creates a coordinator. Half messages it stages are checked back
    /// against `orders`.
    pub fn new(
        ids: Arc<IdGenerator>,
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogClient>,
        inventory: Arc<dyn InventoryClient>,
        producer: Producer,
    ) -> Self {
        let checker = Arc::new(OrderTransactionChecker::new(orders.clone()));
        let transactions = TransactionProducer::new(producer.broker().clone(), checker);
        Self {
            ids,
            orders,
            catalog,
            inventory,
            producer,
            transactions,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Creates a pending order for one product line.
    ///
    /// On success the stock is reserved and a pay-timeout message is
    /// scheduled. On failure after the reservation, the stock is released
    /// asynchronously by the inventory service.
    #[tracing::instrument(
        skip(self, request),
        fields(
            buyer_id = %request.buyer_id,
            product_id = %request.product_id,
            quantity = request.quantity
        )
    )]
    pub async fn create_order(&self, request: CreateOrder) -> Result<OrderResult> {
        let started = Instant::now();
        let result = self.run_create(request).await;
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(created) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(order_id = %created.order_id, pay_amount = %created.pay_amount, "order created");
            }
            Err(e) => {
                metrics::counter!("orders_failed_total").increment(1);
                tracing::warn!(error = %e, "order creation failed");
            }
        }
        result
    }

    async fn run_create(&self, request: CreateOrder) -> Result<OrderResult> {
        if !request.buyer_id.is_valid() {
            return Err(OrderError::InvalidArgument(format!(
                "buyer id must be positive, got {}",
                request.buyer_id
            )));
        }

        let order_id = self.ids.next_id();
        let payload = StockMessage::new(order_id, request.product_id, request.quantity);
        let message = Message::json(TOPIC_INVENTORY_ROLLBACK, &payload)?;

        // Detached from the caller: dropping the request must not stop the
        // transaction between reservation and outcome report.
        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let local = CreateOrderTransaction::new(this.clone(), request, payload);
                let sent = this.transactions.send_in_transaction(message, &local).await;
                (sent, local.into_outcome())
            }
            .instrument(tracing::Span::current()),
        );
        let (sent, outcome) = task
            .await
            .map_err(|e| OrderError::Internal(format!("order task aborted: {e}")))?;
        let sent = sent?;

        match (sent.state, outcome) {
            (LocalTransactionState::Rollback, Outcome::Created(created)) => Ok(created),
            (_, Outcome::Failed(e)) => Err(e),
            (state, _) => Err(OrderError::Internal(format!(
                "order {order_id} ended with transaction state {state}"
            ))),
        }
    }

    /// Pays a pending order and turns its reservation into a sale.
    ///
    /// Status changes are compare-and-set, so a racing pay timeout and
    /// payment cannot both win. If the timeout compensation has already
    /// released the stock, the order is closed and the payment refused.
    #[tracing::instrument(skip(self))]
    pub async fn pay_order(&self, order_id: OrderId) -> Result<Order> {
        if !order_id.is_valid() {
            return Err(OrderError::InvalidArgument(format!(
                "order id must be positive, got {order_id}"
            )));
        }

        let order = self
            .orders
            .find(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(OrderError::InvalidStatusTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Paid,
            });
        }
        let item = self
            .orders
            .line_item(order_id)
            .await?
            .ok_or_else(|| OrderError::Internal(format!("order {order_id} has no line item")))?;

        // Claim the order first; a timeout arriving afterwards sees it paid.
        if !self
            .orders
            .transition_status(order_id, OrderStatus::Pending, OrderStatus::Paid)
            .await?
        {
            let current = self
                .orders
                .find(order_id)
                .await?
                .map_or(order.status, |o| o.status);
            return Err(OrderError::InvalidStatusTransition {
                order_id,
                from: current,
                to: OrderStatus::Paid,
            });
        }

        match self
            .call(self.inventory.confirm(order_id, item.product_id))
            .await
        {
            Ok(()) => {}
            Err(RpcError::FailedPrecondition(reason)) => {
                tracing::warn!(%reason, "reservation already released, closing order");
                self.orders
                    .transition_status(order_id, OrderStatus::Paid, OrderStatus::Closed)
                    .await?;
                return Err(OrderError::InvalidStatusTransition {
                    order_id,
                    from: OrderStatus::Closed,
                    to: OrderStatus::Paid,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "confirming reservation failed, reopening order");
                if self
                    .orders
                    .transition_status(order_id, OrderStatus::Paid, OrderStatus::Pending)
                    .await?
                {
                    self.reschedule_pay_timeout(&item).await;
                }
                return Err(OrderError::Downstream(e));
            }
        }

        metrics::counter!("orders_paid_total").increment(1);
        tracing::info!("order paid");
        self.orders
            .find(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Gives a reopened order a fresh pay window. A pay timeout delivered
    /// while the order was claimed as paid has been acknowledged and is gone.
    async fn reschedule_pay_timeout(&self, item: &OrderLineItem) {
        let payload = StockMessage::new(item.order_id, item.product_id, item.quantity);
        let scheduled = match Message::json(TOPIC_ORDER_PAY_TIMEOUT, &payload) {
            Ok(timeout) => self
                .producer
                .send(timeout.with_delay(self.config.pay_timeout))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        let Err(e) = scheduled else {
            return;
        };

        tracing::error!(error = %e, "rescheduling pay timeout failed, closing order");
        if let Err(e) = self.close_and_release(&payload).await {
            tracing::error!(error = %e, "closing reopened order failed, stock stays locked");
        }
    }

    /// Releases the reservation and closes the order, as the pay timeout would.
    async fn close_and_release(&self, payload: &StockMessage) -> Result<()> {
        self.producer
            .send(Message::json(TOPIC_INVENTORY_ROLLBACK, payload)?)
            .await?;
        self.orders
            .transition_status(payload.order_id, OrderStatus::Pending, OrderStatus::Closed)
            .await?;
        Ok(())
    }

    /// Runs a downstream call under the configured deadline.
    async fn call<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, RpcError>>,
    ) -> std::result::Result<T, RpcError> {
        match tokio::time::timeout(self.config.rpc_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::DeadlineExceeded(self.config.rpc_timeout)),
        }
    }
}

/// Maps a refused downstream call to what the buyer gets to see.
fn rejected(e: RpcError) -> OrderError {
    match e {
        RpcError::InvalidArgument(msg) | RpcError::NotFound(msg) => {
            OrderError::InvalidArgument(msg)
        }
        RpcError::FailedPrecondition(msg) => OrderError::InsufficientStock(msg),
        other => OrderError::Downstream(other),
    }
}

#[derive(Debug)]
enum Outcome {
    NotRun,
    Created(OrderResult),
    Failed(OrderError),
}

/// The local half of order creation, run between staging the compensation
/// message and reporting its fate.
struct CreateOrderTransaction {
    coordinator: OrderSagaCoordinator,
    request: CreateOrder,
    payload: StockMessage,
    outcome: Mutex<Outcome>,
}

impl CreateOrderTransaction {
    fn new(coordinator: OrderSagaCoordinator, request: CreateOrder, payload: StockMessage) -> Self {
        Self {
            coordinator,
            request,
            payload,
            outcome: Mutex::new(Outcome::NotRun),
        }
    }

    fn into_outcome(self) -> Outcome {
        self.outcome.into_inner()
    }

    async fn run(&self) -> (LocalTransactionState, Outcome) {
        let co = &self.coordinator;
        let request = &self.request;
        let order_id = self.payload.order_id;

        // 1. Price the goods. Nothing is reserved yet.
        let quote = match co
            .call(co.catalog.goods_detail(request.product_id, request.buyer_id))
            .await
        {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(error = %e, "goods lookup failed");
                return (LocalTransactionState::Rollback, Outcome::Failed(rejected(e)));
            }
        };
        let Some(pay_amount) = quote.price.checked_mul(request.quantity) else {
            return (
                LocalTransactionState::Rollback,
                Outcome::Failed(OrderError::InvalidArgument(format!(
                    "quantity {} is too large",
                    request.quantity
                ))),
            );
        };

        // 2. Reserve the stock.
        match co
            .call(
                co.inventory
                    .reserve(request.product_id, request.quantity, order_id),
            )
            .await
        {
            Ok(remaining) => tracing::debug!(remaining, "stock reserved"),
            Err(e) => {
                tracing::warn!(error = %e, "stock reservation failed");
                return (LocalTransactionState::Rollback, Outcome::Failed(rejected(e)));
            }
        }

        // From here on stock is held: every failure commits the compensation.

        // 3. Persist the order and its line item.
        let order = Order::pending(
            order_id,
            request.buyer_id,
            pay_amount,
            request.shipping.clone(),
        );
        let line_item = OrderLineItem {
            order_id,
            buyer_id: request.buyer_id,
            product_id: request.product_id,
            quantity: request.quantity,
        };
        if let Err(e) = co.orders.create(&order, &line_item).await {
            tracing::error!(error = %e, "persisting order failed, releasing stock");
            return (
                LocalTransactionState::Commit,
                Outcome::Failed(OrderError::Internal(format!("order not saved: {e}"))),
            );
        }

        // 4. Schedule the pay timeout.
        let scheduled = match Message::json(TOPIC_ORDER_PAY_TIMEOUT, &self.payload) {
            Ok(timeout) => co
                .producer
                .send(timeout.with_delay(co.config.pay_timeout))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = scheduled {
            tracing::error!(error = %e, "scheduling pay timeout failed, releasing stock");
            return (
                LocalTransactionState::Commit,
                Outcome::Failed(OrderError::Internal(format!(
                    "pay timeout not scheduled: {e}"
                ))),
            );
        }

        (
            LocalTransactionState::Rollback,
            Outcome::Created(OrderResult {
                order_id,
                pay_amount,
                status: order.status,
            }),
        )
    }
}

#[async_trait]
impl LocalTransaction for CreateOrderTransaction {
    async fn execute(&self, _message: &Message) -> LocalTransactionState {
        let (state, outcome) = self.run().await;
        *self.outcome.lock().await = outcome;
        state
    }
}

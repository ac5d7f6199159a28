//! Wiring of stores, services, consumers and the broker.

use std::sync::Arc;

use broker::{
    BrokerConfig, BrokerError, ConsumerConfig, ConsumerHandle, InMemoryBroker, MessageBroker,
    Producer, PushConsumer,
};
use catalog::{CatalogService, CatalogStore, InMemoryCatalogStore, PostgresCatalogStore};
use common::{IdError, IdGenerator, TOPIC_INVENTORY_ROLLBACK, TOPIC_ORDER_PAY_TIMEOUT};
use inventory::{
    DistributedLock, InMemoryLockManager, InMemoryStockStore, InventoryLedger,
    PostgresAdvisoryLock, PostgresStockStore, ROLLBACK_CONSUMER_GROUP, RollbackHandler,
    StockStore,
};
use order::{
    CoordinatorConfig, InMemoryOrderStore, LocalCatalogClient, LocalInventoryClient,
    OrderError, OrderSagaCoordinator, OrderStore, PAY_TIMEOUT_CONSUMER_GROUP, PostgresOrderStore,
    RecoveryReport, RecoverySweep, TimeoutReaper,
};
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::AppState;
use crate::config::Config;

/// Errors that stop the service from starting.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Invalid id generator settings: {0}")]
    Id(#[from] IdError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Recovery failed: {0}")]
    Recovery(#[from] OrderError),
}

/// Storage behind the services.
#[derive(Clone)]
pub struct Backends {
    pub catalog: Arc<dyn CatalogStore>,
    pub stock: Arc<dyn StockStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub orders: Arc<dyn OrderStore>,
}

impl Backends {
    /// Process-local stores. Nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalogStore::new()),
            stock: Arc::new(InMemoryStockStore::new()),
            lock: Arc::new(InMemoryLockManager::new()),
            orders: Arc::new(InMemoryOrderStore::new()),
        }
    }

    /// Postgres stores sharing one bounded pool. Stock advisory locks get a
    /// pool of their own so lock holders never wait on the stores' pool.
    pub async fn postgres(
        url: &str,
        max_connections: u32,
        lock_connections: u32,
    ) -> Result<Self, BootstrapError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let lock_pool = PgPoolOptions::new()
            .max_connections(lock_connections)
            .connect(url)
            .await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!(
            max_connections,
            lock_connections,
            "connected to postgres, migrations applied"
        );

        Ok(Self {
            catalog: Arc::new(PostgresCatalogStore::new(pool.clone())),
            stock: Arc::new(PostgresStockStore::new(pool.clone())),
            lock: Arc::new(PostgresAdvisoryLock::new(lock_pool)),
            orders: Arc::new(PostgresOrderStore::new(pool)),
        })
    }

    /// Picks the backends named by the configuration.
    pub async fn from_config(config: &Config) -> Result<Self, BootstrapError> {
        match &config.database_url {
            Some(url) => {
                Self::postgres(url, config.db_max_connections, config.db_lock_connections).await
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }
}

/// Everything running behind the HTTP router.
pub struct Services {
    pub state: Arc<AppState>,
    pub broker: InMemoryBroker,
    pub producer: Producer,
    pub recovered: RecoveryReport,
    consumers: Vec<ConsumerHandle>,
    check_back: JoinHandle<()>,
}

impl Services {
    /// Builds the services over `backends`, starts the consumers and the
    /// check-back loop, then re-drives compensation a previous process left
    /// in its broker.
    pub async fn start(config: &Config, backends: Backends) -> Result<Self, BootstrapError> {
        let broker = InMemoryBroker::with_config(BrokerConfig {
            check_interval: config.check_back_interval,
            ..BrokerConfig::default()
        });
        let shared: Arc<dyn MessageBroker> = Arc::new(broker.clone());
        let producer = Producer::new(shared.clone(), config.producer_retries);

        let catalog = CatalogService::new(backends.catalog);
        let inventory = InventoryLedger::new(backends.stock, backends.lock)
            .with_lock_wait(config.lock_wait);
        let ids = Arc::new(IdGenerator::new(&config.id_epoch, config.machine_id)?);

        let coordinator = OrderSagaCoordinator::new(
            ids,
            backends.orders.clone(),
            Arc::new(LocalCatalogClient::new(catalog.clone())),
            Arc::new(LocalInventoryClient::new(inventory.clone())),
            producer.clone(),
        )
        .with_config(CoordinatorConfig {
            pay_timeout: config.pay_timeout(),
            rpc_timeout: config.rpc_timeout,
        });

        let rollback = PushConsumer::start(
            shared.clone(),
            ConsumerConfig::new(TOPIC_INVENTORY_ROLLBACK, ROLLBACK_CONSUMER_GROUP)
                .with_concurrency(config.consumer_concurrency),
            Arc::new(RollbackHandler::new(inventory.clone())),
        )
        .await?;
        let reaper = PushConsumer::start(
            shared,
            ConsumerConfig::new(TOPIC_ORDER_PAY_TIMEOUT, PAY_TIMEOUT_CONSUMER_GROUP)
                .with_concurrency(config.consumer_concurrency),
            Arc::new(TimeoutReaper::new(backends.orders.clone(), producer.clone())),
        )
        .await?;
        let check_back = broker.spawn_check_back();

        let recovered = RecoverySweep::new(
            backends.orders.clone(),
            inventory.clone(),
            producer.clone(),
        )
        .with_pay_timeout(config.pay_timeout())
        .with_grace(config.recovery_grace)
        .run()
        .await?;

        tracing::info!(
            pay_timeout = ?config.pay_timeout().duration(),
            consumer_concurrency = config.consumer_concurrency,
            "services started"
        );

        Ok(Self {
            state: Arc::new(AppState {
                coordinator,
                orders: backends.orders,
                catalog,
                inventory,
                producer: producer.clone(),
            }),
            broker,
            producer,
            recovered,
            consumers: vec![rollback, reaper],
            check_back,
        })
    }

    /// Stops in order: no new sends, broker closed, consumers drained.
    ///
    /// Pending delayed messages are dropped with the broker; the next
    /// [`start`](Self::start) reschedules them from the stores.
    pub async fn shutdown(self) {
        self.producer.shutdown().await;
        if let Err(e) = self.broker.shutdown().await {
            tracing::error!(error = %e, "broker shutdown failed");
        }
        if let Err(e) = self.check_back.await {
            tracing::error!(error = %e, "check-back loop failed");
        }
        for consumer in self.consumers {
            let group = consumer.config().group.clone();
            let stats = consumer.join().await;
            tracing::info!(%group, ?stats, "consumer stopped");
        }
    }
}

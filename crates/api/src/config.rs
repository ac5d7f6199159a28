//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use broker::DelayLevel;
use common::DEFAULT_EPOCH;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` Postgres connection string; unset means in-memory stores
/// - `DB_MAX_CONNECTIONS` size of the shared pool (default: `10`)
/// - `DB_LOCK_CONNECTIONS` size of the separate stock lock pool (default: `10`)
/// - `MACHINE_ID` order id generator machine id (default: `1`)
/// - `ID_EPOCH` order id generator epoch (default: `"2023-08-28"`)
/// - `PAY_TIMEOUT_LEVEL` delay tier of the pay timeout (default: `2`, 5s)
/// - `LOCK_WAIT_MS` stock lock wait (default: `3000`)
/// - `RPC_TIMEOUT_MS` deadline of service-to-service calls (default: `3000`)
/// - `CONSUMER_CONCURRENCY` handlers running per consumer (default: `8`)
/// - `PRODUCER_RETRIES` extra attempts of a failed send (default: `2`)
/// - `CHECK_BACK_INTERVAL_MS` half message check-back period (default: `1000`)
/// - `RECOVERY_GRACE_MS` age before the startup sweep settles a reservation (default: `60000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_lock_connections: u32,
    pub machine_id: i64,
    pub id_epoch: String,
    pub pay_timeout_level: u8,
    pub lock_wait: Duration,
    pub rpc_timeout: Duration,
    pub consumer_concurrency: usize,
    pub producer_retries: u32,
    pub check_back_interval: Duration,
    pub recovery_grace: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            db_max_connections: parse_or(lookup("DB_MAX_CONNECTIONS"), defaults.db_max_connections),
            db_lock_connections: parse_or(
                lookup("DB_LOCK_CONNECTIONS"),
                defaults.db_lock_connections,
            ),
            machine_id: parse_or(lookup("MACHINE_ID"), defaults.machine_id),
            id_epoch: lookup("ID_EPOCH").unwrap_or(defaults.id_epoch),
            pay_timeout_level: parse_or(lookup("PAY_TIMEOUT_LEVEL"), defaults.pay_timeout_level),
            lock_wait: millis_or(lookup("LOCK_WAIT_MS"), defaults.lock_wait),
            rpc_timeout: millis_or(lookup("RPC_TIMEOUT_MS"), defaults.rpc_timeout),
            consumer_concurrency: parse_or(
                lookup("CONSUMER_CONCURRENCY"),
                defaults.consumer_concurrency,
            ),
            producer_retries: parse_or(lookup("PRODUCER_RETRIES"), defaults.producer_retries),
            check_back_interval: millis_or(
                lookup("CHECK_BACK_INTERVAL_MS"),
                defaults.check_back_interval,
            ),
            recovery_grace: millis_or(lookup("RECOVERY_GRACE_MS"), defaults.recovery_grace),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the pay-timeout delay tier, clamped to the ladder.
    pub fn pay_timeout(&self) -> DelayLevel {
        DelayLevel::new(self.pay_timeout_level).unwrap_or(if self.pay_timeout_level == 0 {
            DelayLevel::MIN
        } else {
            DelayLevel::MAX
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn millis_or(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            db_lock_connections: 10,
            machine_id: 1,
            id_epoch: DEFAULT_EPOCH.to_string(),
            pay_timeout_level: 2,
            lock_wait: Duration::from_millis(3000),
            rpc_timeout: Duration::from_millis(3000),
            consumer_concurrency: 8,
            producer_retries: 2,
            check_back_interval: Duration::from_millis(1000),
            recovery_grace: Duration::from_secs(60),
        }
    }
}

//! Keyed mutual exclusion shared by every inventory instance.
//!
//! The ledger takes the lock of a product before it opens the storage
//! transaction of a reservation. The lock is the authoritative serialization
//! point; the row lock taken inside the transaction only backs it up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::error::LockError;

/// A keyed lock that may be held across processes.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquires the lock for `key`, waiting at most `wait`.
    async fn acquire(&self, key: &str, wait: Duration) -> Result<LockGuard, LockError>;
}

/// Backend-specific handle of a held lock.
#[async_trait]
pub trait HeldLock: Send {
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// A held lock.
///
/// Call [`release`](Self::release) when done. Dropping the guard instead
/// still frees the lock, but without reporting errors.
pub struct LockGuard {
    key: String,
    held: Option<Box<dyn HeldLock>>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, held: Box<dyn HeldLock>) -> Self {
        Self {
            key: key.into(),
            held: Some(held),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock.
    pub async fn release(mut self) -> Result<(), LockError> {
        match self.held.take() {
            Some(held) => held.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.held.is_some() {
            tracing::debug!(key = %self.key, "lock guard dropped without explicit release");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("held", &self.held.is_some())
            .finish()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local lock manager: one async mutex per key.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockManager {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

struct LocalHold(OwnedMutexGuard<()>);

#[async_trait]
impl HeldLock for LocalHold {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        drop(self.0);
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for InMemoryLockManager {
    async fn acquire(&self, key: &str, wait: Duration) -> Result<LockGuard, LockError> {
        let lock = self.lock_for(key);
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => Ok(LockGuard::new(key, Box::new(LocalHold(guard)))),
            Err(_) => Err(LockError::Timeout {
                key: key.to_string(),
                waited: wait,
            }),
        }
    }
}

// ============================================================================
// PostgreSQL advisory locks
// ============================================================================

/// Lock backed by PostgreSQL session advisory locks.
///
/// Keys are hashed with `hashtext`. A held lock pins one pooled connection
/// until it is released; a waiter only borrows a connection for each attempt.
/// Give the lock a pool of its own: sharing the stock store's pool lets lock
/// holders starve the transactions they are guarding.
#[derive(Clone)]
pub struct PostgresAdvisoryLock {
    pool: PgPool,
    poll_interval: Duration,
}

impl PostgresAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_millis(20),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

struct AdvisoryHold {
    key: String,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl HeldLock for AdvisoryHold {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut hold = self;
        let Some(mut conn) = hold.conn.take() else {
            return Ok(());
        };
        let unlocked: bool = sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
            .bind(&hold.key)
            .fetch_one(&mut *conn)
            .await?;
        if !unlocked {
            tracing::warn!(key = %hold.key, "advisory lock was not held at release");
        }
        Ok(())
    }
}

impl Drop for AdvisoryHold {
    fn drop(&mut self) {
        // Session locks die with the session.
        if let Some(mut conn) = self.conn.take() {
            conn.close_on_drop();
        }
    }
}

impl PostgresAdvisoryLock {
    /// One `pg_try_advisory_lock` attempt. The connection goes back to the
    /// pool unless the lock was taken.
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        deadline: Instant,
    ) -> Result<Option<AdvisoryHold>, LockError> {
        let timed_out = || LockError::Timeout {
            key: key.to_string(),
            waited: wait,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut conn = tokio::time::timeout(remaining, self.pool.acquire())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| match e {
                sqlx::Error::PoolTimedOut => timed_out(),
                e => LockError::Backend(e),
            })?;

        let acquired: bool =
            sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1)::bigint)")
                .bind(key)
                .fetch_one(&mut *conn)
                .await?;

        Ok(acquired.then(|| AdvisoryHold {
            key: key.to_string(),
            conn: Some(conn),
        }))
    }
}

#[async_trait]
impl DistributedLock for PostgresAdvisoryLock {
    async fn acquire(&self, key: &str, wait: Duration) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(hold) = self.try_acquire(key, wait, deadline).await? {
                return Ok(LockGuard::new(key, Box::new(hold)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: wait,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

//! Connection pool management.
//!
//! A bounded pool of store connections. A semaphore caps how many
//! connections are open at once; released connections are parked in an
//! idle set up to `max_idle`. Callers hold a [`Lease`] while they use a
//! connection, and the lease returns it on release or drop.

use crate::builder;
use crate::config::PoolConfig;
use crate::db::store::{self, Store};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Statement};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::{AnyConnection, Connection};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Connections currently open, idle or leased.
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max_open: u32,
    pub max_idle: u32,
}

struct PoolInner {
    store: Store,
    config: PoolConfig,
    idle: Mutex<VecDeque<AnyConnection>>,
    semaphore: Arc<Semaphore>,
    open: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    /// Return a connection from a finished lease.
    fn put_back(&self, conn: AnyConnection, broken: bool) {
        if broken {
            self.open.fetch_sub(1, Ordering::SeqCst);
            warn!(db_type = %self.store.db_type(), "Discarding broken connection");
            return;
        }

        let mut idle = self.idle.lock();
        if self.closed.load(Ordering::SeqCst) || idle.len() >= self.config.max_idle as usize {
            drop(idle);
            self.open.fetch_sub(1, Ordering::SeqCst);
            debug!(max_idle = self.config.max_idle, "Idle set full, closing connection");
            return;
        }
        idle.push_back(conn);
    }

    fn discard(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A bounded connection pool.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Validate the configuration, open one warm-up connection, ping it and
    /// park it idle.
    pub async fn connect(config: PoolConfig) -> DbResult<Self> {
        config.validate()?;
        let store = Store::new(config.url.clone())?;

        info!(
            url = %config.masked_url(),
            db_type = %store.db_type(),
            max_open = config.max_open,
            max_idle = config.max_idle,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "Creating connection pool"
        );

        let deadline = Deadline::after(config.acquire_timeout);
        let mut conn = deadline.run("connect", store.open()).await??;
        deadline.run("ping", store::ping(&mut conn)).await??;

        let pool = Self {
            inner: Arc::new(PoolInner {
                store,
                semaphore: Arc::new(Semaphore::new(config.max_open as usize)),
                config,
                idle: Mutex::new(VecDeque::new()),
                open: AtomicUsize::new(1),
                closed: AtomicBool::new(false),
            }),
        };
        pool.inner.put_back(conn, false);

        info!(db_type = %pool.db_type(), "Connection pool ready");
        Ok(pool)
    }

    /// Lease a connection, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> DbResult<Lease> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Lease a connection, waiting up to `timeout`.
    ///
    /// The limit covers waiting for capacity, opening a new connection and
    /// the `test_before_acquire` ping. A zero timeout never waits for
    /// capacity: if every connection is leased the call fails immediately
    /// with [`DbError::PoolExhausted`].
    pub async fn acquire_timeout(&self, timeout: Duration) -> DbResult<Lease> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::PoolClosed);
        }

        let start = Instant::now();
        let permit = self.reserve(timeout, start).await?;
        let deadline = Deadline::after(timeout);

        loop {
            let parked = self.inner.idle.lock().pop_front();
            let Some(mut conn) = parked else {
                let conn = deadline.run("connect", self.inner.store.open()).await??;
                self.inner.open.fetch_add(1, Ordering::SeqCst);
                debug!(open = self.inner.open.load(Ordering::SeqCst), "Opened new pooled connection");
                return Ok(Lease::new(conn, Arc::clone(&self.inner), permit));
            };

            if self.inner.config.test_before_acquire {
                match deadline.run("ping", store::ping(&mut conn)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "Idle connection failed ping, replacing it");
                        self.inner.discard();
                        continue;
                    }
                    Err(e) => {
                        warn!("Idle connection ping timed out, discarding it");
                        self.inner.discard();
                        return Err(e);
                    }
                }
            }
            return Ok(Lease::new(conn, Arc::clone(&self.inner), permit));
        }
    }

    async fn reserve(&self, timeout: Duration, start: Instant) -> DbResult<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        let exhausted = || DbError::PoolExhausted {
            max_open: self.inner.config.max_open,
            waited_ms: start.elapsed().as_millis() as u64,
        };

        if timeout.is_zero() {
            return match semaphore.try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(exhausted()),
                Err(TryAcquireError::Closed) => Err(DbError::PoolClosed),
            };
        }

        match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(DbError::PoolClosed),
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "Timed out waiting for a connection");
                Err(exhausted())
            }
        }
    }

    /// Current open/idle counts.
    pub fn status(&self) -> PoolStatus {
        let idle = self.inner.idle.lock().len();
        let open = self.inner.open.load(Ordering::SeqCst);
        PoolStatus {
            open,
            idle,
            in_use: open.saturating_sub(idle),
            max_open: self.inner.config.max_open,
            max_idle: self.inner.config.max_idle,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn db_type(&self) -> DatabaseType {
        self.inner.store.db_type()
    }

    /// Rewrite a `?` statement into this backend's placeholder dialect.
    pub fn rebind(&self, stmt: Statement) -> Statement {
        builder::rebind(stmt, self.db_type().bind_style())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Reject further acquires and close idle connections.
    ///
    /// Leased connections are closed when their lease is released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.semaphore.close();

        let drained: Vec<AnyConnection> = self.inner.idle.lock().drain(..).collect();
        let count = drained.len();
        for conn in drained {
            self.inner.discard();
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing idle connection");
            }
        }
        info!(closed_idle = count, "Connection pool closed");
    }
}

/// Deadline for the store round trips of one acquire.
///
/// A zero limit disables it: a zero acquire timeout only means "do not wait
/// for capacity".
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Option<Instant>,
    limit: Duration,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        let at = (!limit.is_zero()).then(|| Instant::now() + limit);
        Self { at, limit }
    }

    /// Run `fut`, failing with [`DbError::Timeout`] once the deadline passes.
    async fn run<F: Future>(&self, operation: &str, fut: F) -> DbResult<F::Output> {
        let Some(at) = self.at else {
            return Ok(fut.await);
        };
        let remaining = at.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, fut).await {
            Ok(output) => Ok(output),
            Err(_) => {
                debug!(operation, timeout_ms = self.limit.as_millis() as u64, "Store did not answer in time");
                Err(DbError::timeout(
                    format!("{operation} while acquiring a connection"),
                    self.limit.as_millis() as u64,
                ))
            }
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("store", &self.inner.store)
            .field("status", &self.status())
            .finish()
    }
}

/// Flags shared between a lease and the cursors reading from it.
#[derive(Debug, Default)]
pub(crate) struct LeaseState {
    broken: AtomicBool,
    leaked: AtomicBool,
}

impl LeaseState {
    pub(crate) fn mark_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_leaked(&self) {
        self.leaked.store(true, Ordering::SeqCst);
    }
}

/// Exclusive use of one pooled connection.
///
/// The connection goes back to the pool when the lease is released or
/// dropped. A lease marked broken, or one whose cursor was leaked, has its
/// connection closed instead.
pub struct Lease {
    conn: Option<AnyConnection>,
    pool: Arc<PoolInner>,
    state: Arc<LeaseState>,
    // Dropped after the connection is parked, so a waiter woken by the
    // permit finds it idle.
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    fn new(conn: AnyConnection, pool: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            pool,
            state: Arc::new(LeaseState::default()),
            _permit: permit,
        }
    }

    /// Connection for a caller statement.
    pub(crate) fn conn_mut(&mut self) -> DbResult<&mut AnyConnection> {
        if self.state.leaked.load(Ordering::SeqCst) {
            return Err(DbError::ResourceLeak);
        }
        self.conn.as_mut().ok_or(DbError::PoolClosed)
    }

    pub(crate) fn state(&self) -> Arc<LeaseState> {
        Arc::clone(&self.state)
    }

    /// Run a transaction control statement (`BEGIN`, `COMMIT`, `ROLLBACK`).
    ///
    /// Allowed on a tainted lease so an open transaction can still be ended.
    pub(crate) async fn run_control(&mut self, sql: &'static str) -> Result<(), sqlx::Error> {
        let conn = self.conn.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        sqlx::Executor::execute(&mut *conn, sql).await.map(|_| ())
    }

    /// Check the connection with a round trip.
    pub async fn ping(&mut self) -> DbResult<()> {
        store::ping(self.conn_mut()?).await
    }

    /// Close the connection on release instead of returning it.
    pub fn mark_broken(&mut self) {
        self.state.mark_broken();
    }

    pub(crate) fn clear_broken(&mut self) {
        self.state.broken.store(false, Ordering::SeqCst);
    }

    pub fn is_broken(&self) -> bool {
        self.state.broken.load(Ordering::SeqCst) || self.state.leaked.load(Ordering::SeqCst)
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.store.db_type()
    }

    /// Return the connection to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let broken = self.is_broken();
            self.pool.put_back(conn, broken);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("db_type", &self.db_type())
            .field("broken", &self.is_broken())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config(max_open: u32, max_idle: u32) -> PoolConfig {
        PoolConfig::new("sqlite::memory:", max_open, max_idle, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_connect_parks_warm_connection() {
        let pool = Pool::connect(memory_config(2, 1)).await.unwrap();
        let status = pool.status();
        assert_eq!(status.open, 1);
        assert_eq!(status.idle, 1);
        assert_eq!(status.in_use, 0);
    }

    #[tokio::test]
    async fn test_connect_without_idle_capacity_closes_warm_connection() {
        let pool = Pool::connect(memory_config(1, 0)).await.unwrap();
        assert_eq!(pool.status().open, 0);
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let err = Pool::connect(memory_config(0, 0)).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_zero_timeout_exhausted() {
        let pool = Pool::connect(memory_config(1, 1)).await.unwrap();
        let lease = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DbError::PoolExhausted { max_open: 1, .. }));
        lease.release();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_lease_is_discarded() {
        let pool = Pool::connect(memory_config(1, 1)).await.unwrap();
        let mut lease = pool.acquire().await.unwrap();
        lease.mark_broken();
        drop(lease);
        assert_eq!(pool.status().open, 0);
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let pool = Pool::connect(memory_config(1, 1)).await.unwrap();
        pool.close().await;
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await.unwrap_err(), DbError::PoolClosed));
        assert_eq!(pool.status().open, 0);
    }

    #[tokio::test]
    async fn test_rebind_uses_backend_dialect() {
        let pool = Pool::connect(memory_config(1, 1)).await.unwrap();
        let stmt = builder::bind_positional("select ?", [1]).unwrap();
        assert_eq!(pool.rebind(stmt).text(), "select ?");
    }

    #[tokio::test]
    async fn test_deadline_bounds_store_round_trip() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let start = Instant::now();
        let err = deadline
            .run("connect", std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout { ref operation, .. } if operation.starts_with("connect")));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(err.is_retryable());

        let unbounded = Deadline::after(Duration::ZERO);
        assert_eq!(unbounded.run("ping", async { 7 }).await.unwrap(), 7);
    }
}

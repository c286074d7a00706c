//! Bounded, LIFO, inactivity-gated connection pool.
//!
//! The pool keeps released connections on a stack together with their
//! release time:
//!
//! - [`Pool::acquire`] pops the most recently released connection. Entries
//!   idle for at least the inactivity timeout are closed and skipped. An
//!   empty stack means a new connection is created.
//! - [`Pool::release`] pushes the connection back unless the stack already
//!   holds `capacity` entries, in which case it is closed.
//! - A capacity of zero (or a negative configured size) disables pooling:
//!   every checkout creates a connection and every release closes it.
//!
//! The stack is guarded by a single mutex and every pop/push/size-check
//! sequence of one `acquire` or `release` runs inside one critical section.
//! Connections are opened and closed outside the lock.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Creates and closes the raw connections a [`Pool`] hands out.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;
    type Error: Send + 'static;

    /// Opens a fresh connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Closes a connection. Failures are the manager's to log; the
    /// connection is gone either way.
    async fn disconnect(&self, conn: Self::Connection);
}

/// Pool sizing and staleness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum idle connections kept; zero disables pooling.
    pub capacity: usize,
    /// Idle time after which a pooled connection is discarded on checkout.
    pub inactive_timeout: Duration,
}

impl PoolConfig {
    /// Builds a config from a signed pool size as found in locators.
    pub fn new(pool_size: i64, inactive_timeout: Duration) -> Self {
        Self {
            capacity: usize::try_from(pool_size).unwrap_or(0),
            inactive_timeout,
        }
    }
}

struct PoolEntry<C> {
    conn: C,
    released_at: Instant,
}

/// A pool of reusable connections produced by a [`ConnectionManager`].
pub struct Pool<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    idle: Mutex<Vec<PoolEntry<M::Connection>>>,
}

impl<M: ConnectionManager> Pool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        Self {
            manager,
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// True when every checkout opens a dedicated connection.
    pub fn is_disabled(&self) -> bool {
        self.config.capacity == 0
    }

    /// Number of idle connections currently pooled.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Checks out a connection.
    ///
    /// # Errors
    ///
    /// Returns the manager's error if a new connection has to be opened and
    /// that fails.
    pub async fn acquire(&self) -> Result<M::Connection, M::Error> {
        if self.is_disabled() {
            return self.manager.connect().await;
        }

        let (fresh, stale) = self.pop_fresh();
        for conn in stale {
            debug!("closing stale pooled connection");
            self.manager.disconnect(conn).await;
        }

        match fresh {
            Some(conn) => Ok(conn),
            None => {
                debug!("pool empty, opening connection");
                self.manager.connect().await
            },
        }
    }

    /// Pops entries until a fresh one is found, collecting stale ones.
    fn pop_fresh(&self) -> (Option<M::Connection>, Vec<M::Connection>) {
        let mut idle = self.idle.lock();
        let mut stale = Vec::new();
        while let Some(entry) = idle.pop() {
            if entry.released_at.elapsed() < self.config.inactive_timeout {
                return (Some(entry.conn), stale);
            }
            stale.push(entry.conn);
        }
        (None, stale)
    }

    /// Returns a connection to the pool, closing it if the pool is full.
    pub async fn release(&self, conn: M::Connection) {
        let overflow = {
            let mut idle = self.idle.lock();
            if idle.len() >= self.config.capacity {
                Some(conn)
            } else {
                idle.push(PoolEntry {
                    conn,
                    released_at: Instant::now(),
                });
                None
            }
        };

        if let Some(conn) = overflow {
            if !self.is_disabled() {
                debug!(capacity = self.config.capacity, "pool full, closing connection");
            }
            self.manager.disconnect(conn).await;
        }
    }

    /// Closes a connection instead of returning it (e.g. after a driver
    /// error left it in an unknown state).
    pub async fn discard(&self, conn: M::Connection) {
        self.manager.disconnect(conn).await;
    }

    /// Runs `op` on a checked-out connection.
    ///
    /// `op` hands the connection back together with its result. The
    /// connection returns to the pool when the result is `Ok` and is closed
    /// when it is `Err`.
    ///
    /// # Errors
    ///
    /// Returns the checkout error or the error produced by `op`.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, M::Error>
    where
        F: FnOnce(M::Connection) -> Fut,
        Fut: Future<Output = (M::Connection, Result<T, M::Error>)>,
    {
        let conn = self.acquire().await?;
        let (conn, result) = op(conn).await;
        match result {
            Ok(value) => {
                self.release(conn).await;
                Ok(value)
            },
            Err(e) => {
                self.discard(conn).await;
                Err(e)
            },
        }
    }

    /// Drains and closes every pooled connection.
    ///
    /// Meant for process shutdown, not for use while operations are running.
    pub async fn close(&self) {
        let drained = std::mem::take(&mut *self.idle.lock());
        for entry in drained {
            self.manager.disconnect(entry.conn).await;
        }
    }
}

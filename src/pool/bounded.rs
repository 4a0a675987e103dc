use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::metrics::metrics;

use super::lease::PoolLease;
use super::result::BackendError;
use super::{BackendConn, Connector};

/// A backend connection plus the bookkeeping the pool keeps for it
pub(super) struct Tracked<T> {
    pub(super) conn: T,
    pub(super) id: u64,
    /// Database selected when the connection was opened
    initial_database: Option<String>,
    created_at: Instant,
    last_used_at: Instant,
}

impl<T: BackendConn> Tracked<T> {
    fn is_expired(&self, config: &PoolConfig) -> bool {
        self.created_at.elapsed() > config.max_age()
    }

    fn is_idle_too_long(&self, config: &PoolConfig) -> bool {
        self.last_used_at.elapsed() > config.max_idle_time()
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_connections: usize,
    /// Leases currently outstanding
    pub in_use: usize,
    pub idle: usize,
    /// Leases handed out since creation
    pub acquired: u64,
    /// Leases given back through `release`
    pub released: u64,
    /// Leases dropped without `release`
    pub dropped: u64,
}

pub(super) struct PoolShared<C: Connector> {
    pub(super) namespace: String,
    connector: C,
    config: PoolConfig,
    /// One permit per outstanding lease
    semaphore: Arc<Semaphore>,
    /// Idle connections
    idle: Mutex<VecDeque<Tracked<C::Conn>>>,
    next_id: AtomicU64,
    acquired: AtomicU64,
    pub(super) released: AtomicU64,
    pub(super) dropped: AtomicU64,
}

impl<C: Connector> PoolShared<C> {
    /// Return a connection to the idle list
    ///
    /// Broken, expired, or unresettable connections are dropped, as are
    /// connections that would push the idle list past `max_idle`. A
    /// connection that switched databases goes back to the one it was
    /// opened with; one opened without a database cannot be cleared and
    /// is dropped.
    pub(super) async fn put(&self, mut tracked: Tracked<C::Conn>, broken: bool) -> bool {
        if broken || !tracked.conn.is_usable() {
            debug!(namespace = %self.namespace, conn = tracked.id, "Connection not usable, discarding");
            return false;
        }

        if tracked.is_expired(&self.config) {
            debug!(namespace = %self.namespace, conn = tracked.id, "Connection expired, discarding");
            return false;
        }

        // COM_RESET_CONNECTION clears session variables, temp tables and open transactions
        if !tracked.conn.reset().await {
            warn!(namespace = %self.namespace, conn = tracked.id, "Failed to reset connection, discarding");
            return false;
        }
        if !self.restore_database(&mut tracked).await {
            return false;
        }
        tracked.last_used_at = Instant::now();

        let mut idle = self.idle.lock().await;

        if self.semaphore.is_closed() {
            return false;
        }

        if idle.len() >= self.config.max_idle {
            debug!(namespace = %self.namespace, "Pool full, discarding connection");
            return false;
        }

        idle.push_back(tracked);
        debug!(namespace = %self.namespace, idle_count = idle.len(), "Returned connection to pool");
        true
    }

    async fn restore_database(&self, tracked: &mut Tracked<C::Conn>) -> bool {
        if tracked.conn.database() == tracked.initial_database.as_deref() {
            return true;
        }
        let Some(db) = tracked.initial_database.clone() else {
            debug!(namespace = %self.namespace, conn = tracked.id, "Connection changed database, discarding");
            return false;
        };
        match tracked.conn.use_database(&db).await {
            Ok(()) => true,
            Err(e) => {
                warn!(namespace = %self.namespace, conn = tracked.id, error = %e, "Failed to restore database, discarding");
                false
            }
        }
    }

    async fn take_idle(&self) -> Option<Tracked<C::Conn>> {
        let mut idle = self.idle.lock().await;
        while let Some(tracked) = idle.pop_front() {
            if !tracked.conn.is_usable() {
                continue;
            }

            if tracked.is_expired(&self.config) {
                debug!(namespace = %self.namespace, conn = tracked.id, "Connection expired, discarding");
                continue;
            }

            if tracked.is_idle_too_long(&self.config) {
                debug!(namespace = %self.namespace, conn = tracked.id, "Connection idle too long, discarding");
                continue;
            }

            return Some(tracked);
        }
        None
    }
}

/// A bounded pool of connections to one backend
///
/// At most `max_connections` leases are outstanding at once; further
/// acquires wait up to `acquire_timeout` for a lease to come back.
pub struct BackendPool<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> Clone for BackendPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> BackendPool<C> {
    /// Create a new pool
    pub fn new(namespace: impl Into<String>, connector: C, config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_connections));
        Self {
            shared: Arc::new(PoolShared {
                namespace: namespace.into(),
                connector,
                config,
                semaphore,
                idle: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Get a connection from the pool
    ///
    /// Returns an idle connection if available, otherwise opens a new one.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<PoolLease<C>, PoolError> {
        let shared = &self.shared;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            res = timeout(shared.config.acquire_timeout(), shared.semaphore.clone().acquire_owned()) => {
                match res {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(PoolError::Closed),
                    Err(_) => Err(PoolError::Timeout),
                }
            }
        }
        .map_err(|e| self.acquire_failed(e))?;

        // Try to get an idle connection
        if let Some(tracked) = shared.take_idle().await {
            debug!(namespace = %shared.namespace, conn = tracked.id, "Reusing idle connection");
            return Ok(self.lease(tracked, permit));
        }

        // Create a new connection
        debug!(namespace = %shared.namespace, "Creating new connection");
        let conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            res = shared.connector.connect(None) => res.map_err(PoolError::Connect),
        }
        .map_err(|e| self.acquire_failed(e))?;

        let now = Instant::now();
        let tracked = Tracked {
            initial_database: conn.database().map(str::to_string),
            conn,
            id: shared.next_id.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            last_used_at: now,
        };
        Ok(self.lease(tracked, permit))
    }

    fn lease(&self, tracked: Tracked<C::Conn>, permit: tokio::sync::OwnedSemaphorePermit) -> PoolLease<C> {
        self.shared.acquired.fetch_add(1, Ordering::Relaxed);
        metrics().record_backend_acquire(&self.shared.namespace);
        PoolLease::new(Arc::clone(&self.shared), tracked, permit)
    }

    fn acquire_failed(&self, err: PoolError) -> PoolError {
        warn!(namespace = %self.shared.namespace, error = %err, "Failed to acquire backend connection");
        metrics().record_backend_acquire_failure(&self.shared.namespace, err.reason());
        err
    }

    /// Namespace this pool serves
    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    /// Get current pool statistics
    pub async fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let max = shared.config.max_connections;
        PoolStats {
            max_connections: max,
            in_use: max.saturating_sub(shared.semaphore.available_permits()),
            idle: shared.idle.lock().await.len(),
            acquired: shared.acquired.load(Ordering::Relaxed),
            released: shared.released.load(Ordering::Relaxed),
            dropped: shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out connections and close all idle ones
    ///
    /// Outstanding leases are discarded when released.
    pub async fn close(&self) {
        self.shared.semaphore.close();
        let mut idle = self.shared.idle.lock().await;
        idle.clear();
        debug!(namespace = %self.shared.namespace, "Closed all idle connections");
    }
}

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Timed out waiting for a backend connection")]
    Timeout,

    #[error("Pool is closed")]
    Closed,

    #[error("Acquire cancelled")]
    Cancelled,

    #[error("Failed to open backend connection: {0}")]
    Connect(#[source] BackendError),
}

impl PoolError {
    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            PoolError::Timeout => "timeout",
            PoolError::Closed => "closed",
            PoolError::Cancelled => "cancelled",
            PoolError::Connect(_) => "connect",
        }
    }
}

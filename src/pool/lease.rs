use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};

use crate::metrics::metrics;

use super::bounded::{PoolShared, Tracked};
use super::result::{BackendError, NativeColumn, NativeResult};
use super::{BackendConn, Connector, PooledBackendConn};

/// A connection leased from a `BackendPool`
///
/// Holds one of the pool's permits until released or dropped.
pub struct PoolLease<C: Connector> {
    shared: Arc<PoolShared<C>>,
    conn: Option<Tracked<C::Conn>>,
    permit: Option<OwnedSemaphorePermit>,
    broken: bool,
}

impl<C: Connector> PoolLease<C> {
    pub(super) fn new(shared: Arc<PoolShared<C>>, conn: Tracked<C::Conn>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            shared,
            conn: Some(conn),
            permit: Some(permit),
            broken: false,
        }
    }

    fn conn_mut(&mut self) -> Result<&mut C::Conn, BackendError> {
        self.conn
            .as_mut()
            .map(|tracked| &mut tracked.conn)
            .ok_or(BackendError::Disconnected)
    }

    /// Flag the lease broken when the error leaves the stream unusable
    fn check<T>(&mut self, res: Result<T, BackendError>) -> Result<T, BackendError> {
        if let Err(e) = &res {
            if e.is_connection_error() {
                self.broken = true;
            }
        }
        res
    }
}

#[async_trait]
impl<C: Connector> PooledBackendConn for PoolLease<C> {
    fn id(&self) -> u64 {
        self.conn.as_ref().map_or(0, |tracked| tracked.id)
    }

    fn database(&self) -> Option<&str> {
        self.conn.as_ref().and_then(|tracked| tracked.conn.database())
    }

    async fn use_database(&mut self, db: &str) -> Result<(), BackendError> {
        let res = self.conn_mut()?.use_database(db).await;
        self.check(res)
    }

    async fn execute(&mut self, sql: &str) -> Result<Vec<NativeResult>, BackendError> {
        let res = self.conn_mut()?.execute(sql).await;
        self.check(res)
    }

    async fn fetch_column_metadata(&mut self, table: &str) -> Result<Vec<NativeColumn>, BackendError> {
        let res = self.conn_mut()?.field_list(table).await;
        self.check(res)
    }

    fn mark_broken(&mut self) {
        self.broken = true;
    }

    async fn release(self: Box<Self>) {
        let mut lease = self;
        let Some(tracked) = lease.conn.take() else {
            return;
        };
        let id = tracked.id;

        let reused = lease.shared.put(tracked, lease.broken).await;
        lease.shared.released.fetch_add(1, Ordering::Relaxed);
        metrics().record_backend_release(&lease.shared.namespace, reused);
        debug!(namespace = %lease.shared.namespace, conn = id, reused, "Released backend connection");

        // Slot frees only after the connection is idle or gone
        lease.permit.take();
    }
}

impl<C: Connector> fmt::Debug for PoolLease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLease")
            .field("namespace", &self.shared.namespace)
            .field("conn", &self.id())
            .field("broken", &self.broken)
            .finish()
    }
}

impl<C: Connector> Drop for PoolLease<C> {
    fn drop(&mut self) {
        if let Some(tracked) = self.conn.take() {
            warn!(
                namespace = %self.shared.namespace,
                conn = tracked.id,
                "Lease dropped without release, discarding connection"
            );
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            metrics().record_backend_release(&self.shared.namespace, false);
        }
    }
}

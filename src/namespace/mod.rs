//! Namespaces: tenants with their own users and backend pool
//!
//! A client authenticates into exactly one namespace; every backend
//! connection its session uses comes from that namespace's pool.

mod manager;

pub use manager::{NamespaceManager, PooledNamespace};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::pool::{PoolError, PooledBackendConn};

/// A tenant a client session is bound to
#[async_trait]
pub trait Namespace: Send + Sync {
    fn name(&self) -> &str;

    /// Database selected for sessions that have not chosen one
    fn default_database(&self) -> Option<&str>;

    /// Lease a backend connection from this namespace's pool
    async fn acquire_connection(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PooledBackendConn>, PoolError>;
}

/// Resolves client credentials to a namespace
pub trait NamespaceRegistry: Send + Sync {
    /// Verify a mysql_native_password `response` to `salt` for `username`
    fn authenticate(&self, username: &str, response: &[u8], salt: &[u8]) -> Option<Arc<dyn Namespace>>;
}

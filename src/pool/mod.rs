mod bounded;
mod connection;
mod lease;
mod result;

pub use bounded::{BackendPool, PoolError, PoolStats};
pub use connection::{MySqlConnection, MySqlConnector};
pub use lease::PoolLease;
pub use result::{BackendError, NativeColumn, NativeOk, NativeResult, NativeRows};

use async_trait::async_trait;

/// A raw connection to a backend SQL engine
#[async_trait]
pub trait BackendConn: Send + 'static {
    /// Database last selected on this connection
    fn database(&self) -> Option<&str>;

    async fn use_database(&mut self, db: &str) -> Result<(), BackendError>;

    /// Run one COM_QUERY; several results when the backend sets
    /// SERVER_MORE_RESULTS_EXISTS
    async fn execute(&mut self, sql: &str) -> Result<Vec<NativeResult>, BackendError>;

    async fn field_list(&mut self, table: &str) -> Result<Vec<NativeColumn>, BackendError>;

    /// Clear session state before the connection is reused
    async fn reset(&mut self) -> bool;

    fn is_usable(&self) -> bool;
}

/// Opens new backend connections for a pool
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: BackendConn;

    async fn connect(&self, database: Option<&str>) -> Result<Self::Conn, BackendError>;
}

/// A connection leased from a namespace's pool
///
/// `release` must be called exactly once; it consumes the lease so a second
/// call cannot be written. A lease dropped without `release` discards its
/// connection.
#[async_trait]
pub trait PooledBackendConn: Send {
    /// Identity of the underlying physical connection
    fn id(&self) -> u64;

    fn database(&self) -> Option<&str>;

    async fn use_database(&mut self, db: &str) -> Result<(), BackendError>;

    async fn execute(&mut self, sql: &str) -> Result<Vec<NativeResult>, BackendError>;

    async fn fetch_column_metadata(&mut self, table: &str) -> Result<Vec<NativeColumn>, BackendError>;

    /// Prevent the connection from returning to the idle list
    fn mark_broken(&mut self);

    async fn release(self: Box<Self>);
}

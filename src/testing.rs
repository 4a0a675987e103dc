//! In-process backend doubles for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::namespace::PooledNamespace;
use crate::pool::{
    BackendConn, BackendError, BackendPool, Connector, NativeColumn, NativeOk, NativeResult,
    NativeRows,
};
use crate::protocol::status::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};

/// Last insert id reported for every INSERT
pub const MOCK_INSERT_ID: u64 = 42;

#[derive(Default)]
struct MockInner {
    connects: usize,
    resets: usize,
    log: Vec<String>,
    fail_connect: bool,
    fail_field_list: bool,
    fail_on: HashSet<String>,
    hang_on: HashSet<String>,
    responses: HashMap<String, Result<Vec<NativeResult>, BackendError>>,
}

/// Shared script and observations for every `MockConn` of a connector
#[derive(Default)]
pub struct MockState {
    inner: Mutex<MockInner>,
    executing: Notify,
}

impl MockState {
    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn resets(&self) -> usize {
        self.inner.lock().resets
    }

    /// Backend operations in order, as `#<conn> <op>`
    pub fn log(&self) -> Vec<String> {
        self.inner.lock().log.clone()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.lock().fail_connect = fail;
    }

    pub fn set_fail_field_list(&self, fail: bool) {
        self.inner.lock().fail_field_list = fail;
    }

    /// Drop the connection when `sql` is executed
    pub fn fail_on(&self, sql: &str) {
        self.inner.lock().fail_on.insert(sql.to_string());
    }

    /// Never answer `sql`
    pub fn hang_on(&self, sql: &str) {
        self.inner.lock().hang_on.insert(sql.to_string());
    }

    pub fn respond(&self, sql: &str, result: Result<Vec<NativeResult>, BackendError>) {
        self.inner.lock().responses.insert(sql.to_string(), result);
    }

    /// Resolves once a hanging statement has reached the backend
    pub async fn wait_hanging(&self) {
        self.executing.notified().await;
    }
}

pub struct MockConnector {
    state: Arc<MockState>,
    /// Database new connections start in unless the caller names one
    database: Option<String>,
}

impl MockConnector {
    pub fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            database: None,
        }
    }

    pub fn with_database(state: Arc<MockState>, database: &str) -> Self {
        Self {
            state,
            database: Some(database.to_string()),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockConn;

    async fn connect(&self, database: Option<&str>) -> Result<MockConn, BackendError> {
        let mut inner = self.state.inner.lock();
        if inner.fail_connect {
            return Err(BackendError::Connect("connection refused".into()));
        }
        inner.connects += 1;
        Ok(MockConn {
            id: inner.connects,
            state: Arc::clone(&self.state),
            database: database.map(str::to_string).or_else(|| self.database.clone()),
            in_trans: false,
            autocommit: true,
            closed: false,
        })
    }
}

/// Emulates transaction and autocommit status of a MySQL session
pub struct MockConn {
    id: usize,
    state: Arc<MockState>,
    database: Option<String>,
    in_trans: bool,
    autocommit: bool,
    closed: bool,
}

impl MockConn {
    fn record(&self, op: String) {
        self.state.inner.lock().log.push(format!("#{} {}", self.id, op));
    }

    fn status(&self) -> u16 {
        let mut status = 0;
        if self.in_trans {
            status |= SERVER_STATUS_IN_TRANS;
        }
        if self.autocommit {
            status |= SERVER_STATUS_AUTOCOMMIT;
        }
        status
    }

    fn apply(&mut self, upper: &str) {
        if upper.starts_with("BEGIN") || upper.starts_with("START TRANSACTION") {
            self.in_trans = true;
        } else if upper.starts_with("COMMIT") || upper.starts_with("ROLLBACK") {
            self.in_trans = upper.ends_with(" AND CHAIN");
        } else if upper.replace(' ', "") == "SETAUTOCOMMIT=0" {
            self.autocommit = false;
        } else if upper.replace(' ', "") == "SETAUTOCOMMIT=1" {
            self.autocommit = true;
            self.in_trans = false;
        } else if !self.autocommit {
            self.in_trans = true;
        }
    }
}

#[async_trait]
impl BackendConn for MockConn {
    fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    async fn use_database(&mut self, db: &str) -> Result<(), BackendError> {
        self.record(format!("use {}", db));
        if db.starts_with("missing") {
            return Err(BackendError::Server {
                code: 1049,
                sql_state: "42000".into(),
                message: format!("Unknown database '{}'", db),
            });
        }
        self.database = Some(db.to_string());
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<Vec<NativeResult>, BackendError> {
        self.record(sql.to_string());

        let (fail, hang, scripted) = {
            let inner = self.state.inner.lock();
            (
                inner.fail_on.contains(sql),
                inner.hang_on.contains(sql),
                inner.responses.get(sql).cloned(),
            )
        };

        if fail {
            self.closed = true;
            return Err(BackendError::Io("connection reset by peer".into()));
        }
        if hang {
            self.state.executing.notify_one();
            std::future::pending::<()>().await;
        }
        if let Some(result) = scripted {
            return result;
        }

        let upper = sql.trim().to_ascii_uppercase();
        self.apply(&upper);

        if upper.starts_with("SELECT") {
            let column = NativeColumn {
                name: "1".into(),
                org_name: "1".into(),
                column_type: 0x08,
                column_length: 1,
                character_set: 0x3f,
                ..Default::default()
            };
            return Ok(vec![NativeResult::Rows(NativeRows {
                columns: vec![column],
                rows: vec![vec![Some(Bytes::from_static(b"1"))]],
                status_flags: self.status(),
                warnings: 0,
            })]);
        }

        let (affected_rows, last_insert_id) = if upper.starts_with("INSERT") {
            (1, MOCK_INSERT_ID)
        } else {
            (0, 0)
        };
        Ok(vec![NativeResult::Ok(NativeOk {
            affected_rows,
            last_insert_id,
            status_flags: self.status(),
            ..Default::default()
        })])
    }

    async fn field_list(&mut self, table: &str) -> Result<Vec<NativeColumn>, BackendError> {
        self.record(format!("field_list {}", table));
        if self.state.inner.lock().fail_field_list {
            return Err(BackendError::Server {
                code: 1146,
                sql_state: "42S02".into(),
                message: format!("Table '{}' doesn't exist", table),
            });
        }
        Ok(["id", "name"]
            .into_iter()
            .map(|name| NativeColumn {
                schema: self.database.clone().unwrap_or_default(),
                table: table.to_string(),
                org_table: table.to_string(),
                name: name.to_string(),
                org_name: name.to_string(),
                column_type: 0x03,
                ..Default::default()
            })
            .collect())
    }

    async fn reset(&mut self) -> bool {
        self.state.inner.lock().resets += 1;
        self.in_trans = false;
        self.autocommit = true;
        true
    }

    fn is_usable(&self) -> bool {
        !self.closed
    }
}

/// A namespace over a real `BackendPool` of mock connections
pub fn mock_namespace(
    name: &str,
    default_database: Option<&str>,
    state: Arc<MockState>,
) -> Arc<PooledNamespace<MockConnector>> {
    mock_namespace_with(name, default_database, state, PoolConfig {
        max_connections: 4,
        acquire_timeout_ms: 50,
        ..Default::default()
    })
}

pub fn mock_namespace_with(
    name: &str,
    default_database: Option<&str>,
    state: Arc<MockState>,
    config: PoolConfig,
) -> Arc<PooledNamespace<MockConnector>> {
    let pool = BackendPool::new(name, MockConnector::new(state), config);
    Arc::new(PooledNamespace::new(
        name,
        default_database.map(str::to_string),
        pool,
    ))
}

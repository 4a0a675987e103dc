use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::metrics::metrics;
use crate::namespace::{Namespace, NamespaceRegistry};
use crate::parser::{StatementKind, StatementParser};
use crate::pool::{BackendError, NativeColumn, NativeResult, PooledBackendConn};
use crate::protocol::{ColumnInfo, ResultSet};

use super::convert::{column_info, result_set};
use super::pin::PinSlot;
use super::{truncate_sql, QueryError, SessionState};

/// Replayed on a fresh connection while the session has autocommit off
const AUTOCOMMIT_OFF: &str = "SET autocommit=0";

/// Per-client query context
///
/// Owns the session state of one client connection and, while a
/// transaction is open, the backend connection pinned to it. All calls
/// come from the connection's worker except `CloseHandle::close`.
pub struct QueryContext {
    /// Client connection id
    conn_id: u32,
    registry: Arc<dyn NamespaceRegistry>,
    parser: Arc<dyn StatementParser>,
    /// Set once by a successful authenticate
    namespace: Option<Arc<dyn Namespace>>,
    /// Database selected by the client; empty when none
    current_db: String,
    session: SessionState,
    slot: PinSlot,
}

/// Closes a `QueryContext` from outside its worker
#[derive(Clone)]
pub struct CloseHandle {
    slot: PinSlot,
    conn_id: u32,
}

impl CloseHandle {
    /// Release any pinned connection and reject further statements
    ///
    /// Returns false if the context was already closed. A statement
    /// running concurrently releases its connection when it finishes.
    pub async fn close(&self) -> bool {
        let first = self.slot.close().await;
        if first {
            metrics().record_session_closed();
            info!(conn_id = self.conn_id, "Query context closed");
        }
        first
    }
}

impl QueryContext {
    pub fn new(
        conn_id: u32,
        registry: Arc<dyn NamespaceRegistry>,
        parser: Arc<dyn StatementParser>,
    ) -> Self {
        metrics().record_session_opened();
        Self {
            conn_id,
            registry,
            parser,
            namespace: None,
            current_db: String::new(),
            session: SessionState::new(),
            slot: PinSlot::new(conn_id),
        }
    }

    /// Bind this context to the namespace `username` belongs to
    ///
    /// Returns false, leaving the context untouched, if the credentials are
    /// rejected or the context is already authenticated.
    pub fn authenticate(&mut self, username: &str, response: &[u8], salt: &[u8]) -> bool {
        if let Some(ns) = &self.namespace {
            warn!(
                conn_id = self.conn_id,
                namespace = %ns.name(),
                user = %username,
                "Already authenticated, ignoring authenticate"
            );
            return false;
        }

        let Some(ns) = self.registry.authenticate(username, response, salt) else {
            warn!(conn_id = self.conn_id, user = %username, "Authentication failed");
            return false;
        };

        if self.current_db.is_empty() {
            if let Some(db) = ns.default_database() {
                self.current_db = db.to_string();
            }
        }
        info!(
            conn_id = self.conn_id,
            namespace = %ns.name(),
            user = %username,
            database = %self.current_db,
            "Client authenticated"
        );
        self.namespace = Some(ns);
        true
    }

    /// Run one SQL statement
    ///
    /// Rows-returning statements produce one `ResultSet` each; statements
    /// that only report an OK produce none and update the session state.
    #[instrument(
        skip(self, cancel, sql),
        fields(conn_id = self.conn_id, namespace = %self.namespace_name(), sql = %truncate_sql(sql, 100))
    )]
    pub async fn execute(&mut self, cancel: &CancellationToken, sql: &str) -> Result<Vec<ResultSet>, QueryError> {
        let result = self.execute_sql(cancel, sql).await;
        if let Err(e) = &result {
            metrics().record_query_error(e.label());
            debug!(error = %e, "Statement failed");
        }
        result
    }

    async fn execute_sql(&mut self, cancel: &CancellationToken, sql: &str) -> Result<Vec<ResultSet>, QueryError> {
        let namespace = self.bound_namespace()?;
        let parsed = self.parser.parse(sql)?;

        let start = Instant::now();
        let results = self.dispatch(&namespace, cancel, &parsed.kind, sql).await?;
        metrics().record_query(
            parsed.kind.label(),
            namespace.name(),
            start.elapsed().as_secs_f64(),
        );
        Ok(results)
    }

    /// Select `db` as the current database (COM_INIT_DB)
    #[instrument(skip(self, cancel), fields(conn_id = self.conn_id, namespace = %self.namespace_name()))]
    pub async fn use_database(&mut self, cancel: &CancellationToken, db: &str) -> Result<(), QueryError> {
        let namespace = self.bound_namespace()?;
        let kind = StatementKind::Use(db.to_string());
        self.dispatch(&namespace, cancel, &kind, db).await.map(|_| ())
    }

    /// Column metadata of `table` in the current database (COM_FIELD_LIST)
    ///
    /// Always runs on a short-lived connection that is released before
    /// returning, even inside a transaction.
    #[instrument(skip(self), fields(conn_id = self.conn_id, namespace = %self.namespace_name()))]
    pub async fn field_list(&mut self, table: &str) -> Result<Vec<ColumnInfo>, QueryError> {
        let result = self.fetch_field_list(table).await;
        if let Err(e) = &result {
            metrics().record_query_error(e.label());
            debug!(error = %e, "Field list failed");
        }
        result
    }

    async fn fetch_field_list(&mut self, table: &str) -> Result<Vec<ColumnInfo>, QueryError> {
        let namespace = self.bound_namespace()?;
        let mut conn = namespace.acquire_connection(&CancellationToken::new()).await?;

        let result = fetch_columns(conn.as_mut(), &self.current_db, table).await;
        conn.release().await;

        Ok(result?.into_iter().map(column_info).collect())
    }

    /// Release any pinned connection; further statements fail with `Closed`
    pub async fn close(&mut self) -> Result<(), QueryError> {
        self.close_handle().close().await;
        Ok(())
    }

    /// Handle for closing this context from a supervisory task
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            slot: self.slot.clone(),
            conn_id: self.conn_id,
        }
    }

    /// Prepared statements are not proxied
    pub fn prepare(&mut self, _sql: &str) -> Result<(), QueryError> {
        Err(QueryError::Unsupported("prepared statements"))
    }

    /// Prepared statements are not proxied
    pub fn statement(&self, _stmt_id: u32) -> Result<(), QueryError> {
        Err(QueryError::Unsupported("prepared statements"))
    }

    pub fn show_process(&self) -> Result<(), QueryError> {
        Err(QueryError::Unsupported("process list"))
    }

    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    pub fn namespace_name(&self) -> &str {
        self.namespace.as_ref().map_or("", |ns| ns.name())
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn status(&self) -> u16 {
        self.session.status()
    }

    pub fn last_insert_id(&self) -> u64 {
        self.session.last_insert_id()
    }

    pub fn affected_rows(&self) -> u64 {
        self.session.affected_rows()
    }

    pub fn last_message(&self) -> &str {
        self.session.message()
    }

    pub fn warning_count(&self) -> u16 {
        self.session.warnings()
    }

    pub fn current_database(&self) -> &str {
        &self.current_db
    }

    pub fn set_client_capability(&mut self, flags: u32) {
        self.session.set_capability(flags);
    }

    pub fn set_command_value(&mut self, cmd: u8) {
        self.session.set_command(cmd);
    }

    /// Identity of the backend connection pinned to the open transaction
    pub fn pinned_connection(&self) -> Option<u64> {
        self.slot.pinned_id()
    }

    fn bound_namespace(&self) -> Result<Arc<dyn Namespace>, QueryError> {
        if self.slot.is_closed() {
            return Err(QueryError::Closed);
        }
        self.namespace.clone().ok_or(QueryError::AuthRequired)
    }

    /// Run a classified statement and settle its connection
    async fn dispatch(
        &mut self,
        namespace: &Arc<dyn Namespace>,
        cancel: &CancellationToken,
        kind: &StatementKind,
        sql: &str,
    ) -> Result<Vec<ResultSet>, QueryError> {
        let mut checkout = self.slot.checkout()?;
        let fresh = !checkout.was_pinned();

        if fresh && self.session.in_transaction() {
            warn!(conn_id = self.conn_id, "Transaction connection was lost, transaction aborted");
            self.session.set_in_transaction(false);
        }

        if fresh {
            match namespace.acquire_connection(cancel).await {
                Ok(conn) => {
                    debug!(
                        conn_id = self.conn_id,
                        backend_conn = conn.id(),
                        database = %self.current_db,
                        "Acquired backend connection"
                    );
                    checkout.set(conn);
                }
                Err(e) => {
                    checkout.finish(false).await;
                    return Err(e.into());
                }
            }
        }

        let replay_autocommit = fresh && !self.session.autocommit();
        let outcome = match checkout.conn_mut() {
            Some(conn) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(QueryError::Cancelled),
                    res = run_statement(conn.as_mut(), kind, sql, &self.current_db, replay_autocommit) => {
                        res.map_err(QueryError::from)
                    }
                }
            }
            None => Err(QueryError::ConnectionLost("no backend connection".into())),
        };

        let (result, keep_pinned) = match outcome {
            Ok(results) => {
                self.apply_results(kind, &results);
                let sets = results
                    .into_iter()
                    .filter_map(|r| match r {
                        NativeResult::Rows(rows) => Some(result_set(rows)),
                        NativeResult::Ok(_) => None,
                    })
                    .collect();
                (Ok(sets), self.session.in_transaction())
            }
            Err(QueryError::Backend {
                code,
                sql_state,
                message,
            }) => {
                self.session.apply_error(&message);
                // A failed COMMIT or ROLLBACK still ends the transaction
                if kind.ends_transaction() {
                    self.session.set_in_transaction(false);
                }
                let err = QueryError::Backend {
                    code,
                    sql_state,
                    message,
                };
                (Err(err), self.session.in_transaction())
            }
            Err(e) => {
                if let Some(conn) = checkout.conn_mut() {
                    conn.mark_broken();
                }
                if self.session.in_transaction() {
                    warn!(conn_id = self.conn_id, error = %e, "Transaction aborted");
                    self.session.set_in_transaction(false);
                }
                (Err(e), false)
            }
        };

        checkout.finish(keep_pinned).await;
        result
    }

    /// Fold a successful statement into the session state
    fn apply_results(&mut self, kind: &StatementKind, results: &[NativeResult]) {
        if let StatementKind::Use(db) = kind {
            self.current_db = db.clone();
            self.session.clear_result();
            return;
        }

        for result in results {
            match result {
                NativeResult::Ok(ok) => self.session.apply_ok(ok),
                NativeResult::Rows(rows) => self.session.apply_rows(rows.status_flags, rows.warnings),
            }
        }

        match kind {
            StatementKind::Begin | StatementKind::Chain => self.session.set_in_transaction(true),
            StatementKind::Commit | StatementKind::Rollback => self.session.set_in_transaction(false),
            StatementKind::SetAutocommit(on) => {
                self.session.set_autocommit(*on);
                // Enabling autocommit commits an open transaction
                if *on {
                    self.session.set_in_transaction(false);
                }
            }
            _ if !self.session.autocommit() => self.session.set_in_transaction(true),
            _ => {}
        }
    }
}

/// Bring a connection up to the session's state, then run the statement
async fn run_statement(
    conn: &mut dyn PooledBackendConn,
    kind: &StatementKind,
    sql: &str,
    current_db: &str,
    replay_autocommit: bool,
) -> Result<Vec<NativeResult>, BackendError> {
    if let StatementKind::Use(db) = kind {
        conn.use_database(db).await?;
        return Ok(Vec::new());
    }

    if !current_db.is_empty() && conn.database() != Some(current_db) {
        conn.use_database(current_db).await?;
    }
    if replay_autocommit {
        conn.execute(AUTOCOMMIT_OFF).await?;
    }
    conn.execute(sql).await
}

async fn fetch_columns(
    conn: &mut dyn PooledBackendConn,
    current_db: &str,
    table: &str,
) -> Result<Vec<NativeColumn>, BackendError> {
    if !current_db.is_empty() && conn.database() != Some(current_db) {
        conn.use_database(current_db).await?;
    }
    conn.fetch_column_metadata(table).await
}

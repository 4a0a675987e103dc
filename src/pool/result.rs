use crate::protocol::{ColumnDefinition, Row};

/// Column descriptor as reported by a backend
pub type NativeColumn = ColumnDefinition;

/// Text result set read from a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeRows {
    pub columns: Vec<NativeColumn>,
    pub rows: Vec<Row>,
    /// Status flags from the terminating EOF
    pub status_flags: u16,
    pub warnings: u16,
}

/// Outcome of a statement that returns no rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeOk {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

/// One result of a backend COM_QUERY
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeResult {
    Rows(NativeRows),
    Ok(NativeOk),
}

impl NativeResult {
    pub fn status_flags(&self) -> u16 {
        match self {
            NativeResult::Rows(rows) => rows.status_flags,
            NativeResult::Ok(ok) => ok.status_flags,
        }
    }

    pub fn warnings(&self) -> u16 {
        match self {
            NativeResult::Rows(rows) => rows.warnings,
            NativeResult::Ok(ok) => ok.warnings,
        }
    }
}

/// Backend connection errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The backend answered with an ERR packet; the connection stays usable
    #[error("Backend error {code} ({sql_state}): {message}")]
    Server {
        code: u16,
        sql_state: String,
        message: String,
    },

    #[error("Connection disconnected")]
    Disconnected,
}

impl BackendError {
    /// True when the connection can no longer be trusted
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, BackendError::Server { .. })
    }
}

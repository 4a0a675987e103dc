use crate::parser::AnalyzerError;
use crate::pool::{BackendError, PoolError};
use crate::protocol::ErrPacket;

/// Errors returned to the protocol server by `QueryContext`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// SQL could not be parsed; nothing was sent to a backend
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Execute before a successful authenticate
    #[error("Not authenticated")]
    AuthRequired,

    /// Execute after close
    #[error("Query context is closed")]
    Closed,

    /// Execute while another statement of the same context is running
    #[error("Another statement is already running on this connection")]
    InFlight,

    /// No backend connection could be obtained
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend ran the statement and reported a failure
    #[error("Backend error {code} ({sql_state}): {message}")]
    Backend {
        code: u16,
        sql_state: String,
        message: String,
    },

    /// I/O failure on the backend connection; any transaction is aborted
    #[error("Lost connection to backend: {0}")]
    ConnectionLost(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("{0} not supported")]
    Unsupported(&'static str),
}

impl QueryError {
    /// Build the ERR packet payload sent to the client
    pub fn to_err_packet(&self) -> ErrPacket {
        match self {
            QueryError::Syntax(detail) => ErrPacket::new(
                1064,
                "42000",
                &format!("You have an error in your SQL syntax; {}", detail),
            ),
            QueryError::AuthRequired => ErrPacket::new(1045, "28000", "Access denied: not authenticated"),
            QueryError::Closed => ErrPacket::new(2013, "HY000", "Lost connection: query context closed"),
            QueryError::InFlight => ErrPacket::new(2014, "HY000", "Commands out of sync; you can't run this command now"),
            QueryError::BackendUnavailable(reason) => {
                ErrPacket::new(1040, "08004", &format!("Backend unavailable: {}", reason))
            }
            QueryError::Backend {
                code,
                sql_state,
                message,
            } => ErrPacket::new(*code, sql_state, message),
            QueryError::ConnectionLost(reason) => {
                ErrPacket::new(2013, "HY000", &format!("Lost connection to backend: {}", reason))
            }
            QueryError::Cancelled => ErrPacket::new(1317, "70100", "Query execution was interrupted"),
            QueryError::Unsupported(what) => {
                ErrPacket::new(1235, "42000", &format!("This version of nsproxy doesn't yet support '{}'", what))
            }
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            QueryError::Syntax(_) => "syntax",
            QueryError::AuthRequired | QueryError::Closed | QueryError::InFlight => "protocol_misuse",
            QueryError::BackendUnavailable(_) => "backend_unavailable",
            QueryError::Backend { .. } => "backend",
            QueryError::ConnectionLost(_) => "connection_lost",
            QueryError::Cancelled => "cancelled",
            QueryError::Unsupported(_) => "unsupported",
        }
    }
}

impl From<AnalyzerError> for QueryError {
    fn from(e: AnalyzerError) -> Self {
        match e {
            AnalyzerError::ParseError(msg) => QueryError::Syntax(msg),
            AnalyzerError::EmptyStatement => QueryError::Syntax("Query was empty".into()),
        }
    }
}

impl From<PoolError> for QueryError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Cancelled => QueryError::Cancelled,
            other => QueryError::BackendUnavailable(other.to_string()),
        }
    }
}

impl From<BackendError> for QueryError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Server {
                code,
                sql_state,
                message,
            } => QueryError::Backend {
                code,
                sql_state,
                message,
            },
            other => QueryError::ConnectionLost(other.to_string()),
        }
    }
}

use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Statement classes the query context dispatches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    Rollback,
    /// `COMMIT AND CHAIN` or `ROLLBACK AND CHAIN`; a new transaction opens at once
    Chain,
    /// `USE <db>`
    Use(String),
    /// `SET autocommit = 0|1`
    SetAutocommit(bool),
    Set,
    Show,
    Other,
}

impl StatementKind {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }

    /// COMMIT, ROLLBACK, or SET autocommit=1 (which commits implicitly)
    pub fn ends_transaction(&self) -> bool {
        matches!(
            self,
            StatementKind::Commit | StatementKind::Rollback | StatementKind::SetAutocommit(true)
        )
    }

    /// Label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Begin => "begin",
            StatementKind::Commit => "commit",
            StatementKind::Rollback => "rollback",
            StatementKind::Chain => "chain",
            StatementKind::Use(_) => "use",
            StatementKind::SetAutocommit(_) | StatementKind::Set => "set",
            StatementKind::Show => "show",
            StatementKind::Other => "other",
        }
    }
}

/// Result of parsing one SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub kind: StatementKind,
}

impl ParsedStatement {
    fn of(kind: StatementKind) -> Self {
        Self { kind }
    }
}

/// Parse entry point consumed by the query context
pub trait StatementParser: Send + Sync {
    fn parse(&self, sql: &str) -> Result<ParsedStatement, AnalyzerError>;
}

/// SQL Analyzer
pub struct SqlAnalyzer {
    dialect: MySqlDialect,
}

impl SqlAnalyzer {
    pub fn new() -> Self {
        Self {
            dialect: MySqlDialect {},
        }
    }

    /// Parse and classify SQL
    pub fn analyze(&self, sql: &str) -> Result<ParsedStatement, AnalyzerError> {
        let sql_trimmed = sql.trim().trim_end_matches(';').trim_end();
        if sql_trimmed.is_empty() {
            return Err(AnalyzerError::EmptyStatement);
        }

        // Quick check for transaction control statements
        if let Some(kind) = transaction_control(sql_trimmed) {
            return Ok(ParsedStatement::of(kind));
        }

        // Parse SQL
        let statements = Parser::parse_sql(&self.dialect, sql_trimmed)
            .map_err(|e| AnalyzerError::ParseError(e.to_string()))?;

        let stmt = statements.first().ok_or(AnalyzerError::EmptyStatement)?;
        let kind = classify(stmt, sql_trimmed);
        debug!(kind = ?kind, "SQL classified");
        Ok(ParsedStatement::of(kind))
    }
}

impl Default for SqlAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser for SqlAnalyzer {
    fn parse(&self, sql: &str) -> Result<ParsedStatement, AnalyzerError> {
        self.analyze(sql)
    }
}

/// Recognise BEGIN / START TRANSACTION / COMMIT / ROLLBACK by keyword
fn transaction_control(sql: &str) -> Option<StatementKind> {
    let upper = sql.to_uppercase();
    let mut words = upper.split_whitespace();
    let first = words.next()?;

    match first {
        "BEGIN" => match words.next() {
            None | Some("WORK") => Some(StatementKind::Begin),
            _ => None,
        },
        "START" if words.next() == Some("TRANSACTION") => Some(StatementKind::Begin),
        "COMMIT" if chains(&upper) => Some(StatementKind::Chain),
        "COMMIT" => Some(StatementKind::Commit),
        // ROLLBACK TO SAVEPOINT keeps the transaction open
        "ROLLBACK" if upper.split_whitespace().any(|w| w == "TO") => Some(StatementKind::Other),
        "ROLLBACK" if chains(&upper) => Some(StatementKind::Chain),
        "ROLLBACK" => Some(StatementKind::Rollback),
        _ => None,
    }
}

/// `AND CHAIN` present; `AND NO CHAIN` is the default and does not chain
fn chains(upper: &str) -> bool {
    let words: Vec<&str> = upper.split_whitespace().collect();
    words.windows(2).any(|w| w == ["AND", "CHAIN"])
}

fn classify(stmt: &Statement, sql: &str) -> StatementKind {
    match stmt {
        Statement::Query(_) => StatementKind::Select,
        Statement::Insert { .. } => StatementKind::Insert,
        Statement::Update { .. } => StatementKind::Update,
        Statement::Delete { .. } => StatementKind::Delete,
        Statement::StartTransaction { .. } => StatementKind::Begin,
        Statement::Commit { chain: true } => StatementKind::Chain,
        Statement::Commit { .. } => StatementKind::Commit,
        Statement::Rollback { savepoint: Some(_), .. } => StatementKind::Other,
        Statement::Rollback { chain: true, .. } => StatementKind::Chain,
        Statement::Rollback { .. } => StatementKind::Rollback,
        Statement::Use { db_name } => StatementKind::Use(db_name.value.clone()),
        Statement::SetVariable { .. } => match parse_set_statement(sql) {
            Some((name, value)) if name.eq_ignore_ascii_case("autocommit") => {
                on_off(&value).map_or(StatementKind::Set, StatementKind::SetAutocommit)
            }
            _ => StatementKind::Set,
        },
        Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowCreate { .. } => StatementKind::Show,
        _ => StatementKind::Other,
    }
}

/// Parse a SET statement to extract variable name and value
///
/// Handles formats like:
/// - SET var = value
/// - SET var := value
/// - SET @@session.var = value
fn parse_set_statement(sql: &str) -> Option<(String, String)> {
    let sql = sql.trim();
    if sql.len() < 4 || !sql[..4].eq_ignore_ascii_case("SET ") {
        return None;
    }
    let rest = sql[4..].trim();

    let lower = rest.to_ascii_lowercase();
    let rest = if lower.starts_with("@@session.") {
        &rest[10..]
    } else if lower.starts_with("@@local.") {
        &rest[8..]
    } else if lower.starts_with("session ") {
        rest[8..].trim_start()
    } else if rest.starts_with("@@") {
        &rest[2..]
    } else {
        rest
    };

    // Find = or :=
    let (var_part, value_part) = if let Some(pos) = rest.find(":=") {
        (&rest[..pos], &rest[pos + 2..])
    } else if let Some(pos) = rest.find('=') {
        (&rest[..pos], &rest[pos + 1..])
    } else {
        return None;
    };

    let var_name = var_part.trim().to_string();
    let var_value = value_part
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string();

    if var_name.is_empty() {
        return None;
    }

    Some((var_name, var_value))
}

fn on_off(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("on") || s.eq_ignore_ascii_case("true") || s == "1" {
        Some(true)
    } else if s.eq_ignore_ascii_case("off") || s.eq_ignore_ascii_case("false") || s == "0" {
        Some(false)
    } else {
        None
    }
}

/// Analyzer errors
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Failed to parse SQL: {0}")]
    ParseError(String),

    #[error("Empty statement")]
    EmptyStatement,
}

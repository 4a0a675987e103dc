mod analyzer;

pub use analyzer::{AnalyzerError, ParsedStatement, SqlAnalyzer, StatementKind, StatementParser};

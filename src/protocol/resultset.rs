//! Protocol-level result sets handed to the client-facing encoder

use bytes::Bytes;

/// Column metadata as presented to clients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnInfo {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub column_length: u32,
    pub charset: u16,
    pub decimals: u8,
    pub column_type: u8,
    pub flag: u16,
    pub default_value: Option<Bytes>,
}

/// A single text-protocol row; `None` is SQL NULL
pub type Row = Vec<Option<Bytes>>;

/// Columns plus rows of one statement result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Value at (row, column) as UTF-8, `None` for NULL or out of range
    pub fn text(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)?
            .get(column)?
            .as_ref()
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

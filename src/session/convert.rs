//! Backend results to protocol-level result sets

use crate::pool::{NativeColumn, NativeRows};
use crate::protocol::{ColumnInfo, ResultSet};

pub(crate) fn column_info(column: NativeColumn) -> ColumnInfo {
    ColumnInfo {
        schema: column.schema,
        table: column.table,
        org_table: column.org_table,
        name: column.name,
        org_name: column.org_name,
        column_length: column.column_length,
        charset: column.character_set,
        decimals: column.decimals,
        column_type: column.column_type,
        flag: column.flags,
        default_value: column.default_value,
    }
}

pub(crate) fn result_set(rows: NativeRows) -> ResultSet {
    ResultSet {
        columns: rows.columns.into_iter().map(column_info).collect(),
        rows: rows.rows,
    }
}

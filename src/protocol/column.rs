//! Column definitions and text-protocol rows as sent by backends

use bytes::{Buf, Bytes};

use super::wire::{read_lenenc_bytes, read_lenenc_int, read_lenenc_string, NULL_MARKER};

/// MySQL's hard limit on columns per table and per result set
pub const MAX_COLUMNS: usize = 4096;

/// Column definition (Protocol::ColumnDefinition41)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
    /// Only present in COM_FIELD_LIST responses
    pub default_value: Option<Bytes>,
}

impl ColumnDefinition {
    /// Parse from packet payload
    ///
    /// `with_default` is set for COM_FIELD_LIST responses, which append the
    /// column default after the fixed fields.
    pub fn parse(payload: &[u8], with_default: bool) -> Option<Self> {
        let mut buf = payload;

        let catalog = read_lenenc_string(&mut buf)?;
        let schema = read_lenenc_string(&mut buf)?;
        let table = read_lenenc_string(&mut buf)?;
        let org_table = read_lenenc_string(&mut buf)?;
        let name = read_lenenc_string(&mut buf)?;
        let org_name = read_lenenc_string(&mut buf)?;

        // Length of fixed fields, always 0x0c
        let fixed_len = read_lenenc_int(&mut buf)? as usize;
        if fixed_len < 10 || buf.len() < fixed_len {
            return None;
        }

        let character_set = buf.get_u16_le();
        let column_length = buf.get_u32_le();
        let column_type = buf.get_u8();
        let flags = buf.get_u16_le();
        let decimals = buf.get_u8();
        buf.advance(fixed_len - 10);

        let default_value = if with_default && !buf.is_empty() {
            if buf[0] == NULL_MARKER {
                None
            } else {
                read_lenenc_bytes(&mut buf).map(Bytes::copy_from_slice)
            }
        } else {
            None
        };

        Some(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            character_set,
            column_length,
            column_type,
            flags,
            decimals,
            default_value,
        })
    }
}

/// Parse a text-protocol row into one optional value per column
///
/// Returns None if the payload holds fewer values than `column_count`.
pub fn parse_text_row(payload: &Bytes, column_count: usize) -> Option<Vec<Option<Bytes>>> {
    // Every value takes at least one byte
    let mut values = Vec::with_capacity(column_count.min(payload.len()));
    let mut offset = 0usize;

    for _ in 0..column_count {
        if offset >= payload.len() {
            return None;
        }
        if payload[offset] == NULL_MARKER {
            values.push(None);
            offset += 1;
            continue;
        }

        let mut cursor = &payload[offset..];
        let before = cursor.len();
        let len = read_lenenc_int(&mut cursor)? as usize;
        let header = before - cursor.len();
        let start = offset + header;
        let end = start.checked_add(len)?;
        if end > payload.len() {
            return None;
        }
        values.push(Some(payload.slice(start..end)));
        offset = end;
    }

    Some(values)
}

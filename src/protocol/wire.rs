//! Length-encoded integer and string helpers

use bytes::{Buf, BufMut, BytesMut};

/// NULL marker inside text protocol rows
pub const NULL_MARKER: u8 = 0xFB;

/// Encode a length-encoded integer
pub fn put_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 65536 {
        buf.put_u8(0xFC);
        buf.put_u16_le(value as u16);
    } else if value < 16777216 {
        buf.put_u8(0xFD);
        buf.put_u8((value & 0xFF) as u8);
        buf.put_u8(((value >> 8) & 0xFF) as u8);
        buf.put_u8(((value >> 16) & 0xFF) as u8);
    } else {
        buf.put_u8(0xFE);
        buf.put_u64_le(value);
    }
}

/// Encode a length-encoded string
pub fn put_lenenc_bytes(buf: &mut BytesMut, data: &[u8]) {
    put_lenenc_int(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read a length-encoded integer, advancing the cursor
///
/// Returns None on truncated input or on the 0xFB / 0xFF markers.
pub fn read_lenenc_int(buf: &mut &[u8]) -> Option<u64> {
    if buf.is_empty() {
        return None;
    }
    let first = buf[0];
    match first {
        0x00..=0xFA => {
            buf.advance(1);
            Some(first as u64)
        }
        0xFC if buf.len() >= 3 => {
            buf.advance(1);
            Some(buf.get_u16_le() as u64)
        }
        0xFD if buf.len() >= 4 => {
            let value = u32::from_le_bytes([buf[1], buf[2], buf[3], 0]) as u64;
            buf.advance(4);
            Some(value)
        }
        0xFE if buf.len() >= 9 => {
            buf.advance(1);
            Some(buf.get_u64_le())
        }
        _ => None,
    }
}

/// Read a length-encoded string, advancing the cursor
pub fn read_lenenc_bytes<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = read_lenenc_int(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Some(data)
}

/// Read a length-encoded string as UTF-8 (lossy)
pub fn read_lenenc_string(buf: &mut &[u8]) -> Option<String> {
    read_lenenc_bytes(buf).map(|b| String::from_utf8_lossy(b).into_owned())
}

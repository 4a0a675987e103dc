//! Connection phase and generic response packets
//!
//! The proxy is a client of its backends: it parses the server greeting,
//! answers with `mysql_native_password`, and decodes OK / ERR / EOF
//! responses. Clients of the proxy are authenticated against the same
//! scramble with [`verify_auth_response`].

use bytes::{Buf, BufMut, BytesMut};
use sha1::{Digest, Sha1};

use super::packet::{capabilities::*, Packet};
use super::wire::{put_lenenc_int, read_lenenc_int};

const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xFE;
const ERR_HEADER: u8 = 0xFF;

/// Scramble length of mysql_native_password
const SCRAMBLE_LEN: usize = 20;

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Split a NUL-terminated field off the front of `buf`
///
/// A missing terminator takes the rest of the buffer.
fn take_nul_terminated<'a>(buf: &mut &'a [u8]) -> &'a [u8] {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let field = &buf[..end];
    *buf = &buf[(end + 1).min(buf.len())..];
    field
}

/// Server greeting (protocol v10), backend -> proxy
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub server_version: String,
    pub connection_id: u32,
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    /// Both scramble parts, without the trailing NUL
    pub scramble: Vec<u8>,
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut buf = payload;
        if buf.len() < 32 || buf.get_u8() != 10 {
            return None;
        }

        let server_version = String::from_utf8_lossy(take_nul_terminated(&mut buf)).into_owned();
        // connection id, scramble part 1, filler, caps, charset, status,
        // caps, scramble length, reserved
        if buf.len() < 31 {
            return None;
        }
        let connection_id = buf.get_u32_le();
        let mut scramble = buf[..8].to_vec();
        buf.advance(9);

        let caps_low = buf.get_u16_le() as u32;
        let character_set = buf.get_u8();
        let status_flags = buf.get_u16_le();
        let capability_flags = caps_low | (buf.get_u16_le() as u32) << 16;
        let scramble_len = buf.get_u8() as usize;
        buf.advance(10);

        if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = scramble_len.saturating_sub(8).max(13).min(buf.len());
            let part2 = &buf[..part2_len];
            scramble.extend(part2.iter().take_while(|&&b| b != 0));
            buf.advance(part2_len);
        }

        let auth_plugin_name = match take_nul_terminated(&mut buf) {
            name if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !name.is_empty() => {
                String::from_utf8_lossy(name).into_owned()
            }
            _ => NATIVE_PASSWORD_PLUGIN.to_string(),
        };

        Some(Self {
            server_version,
            connection_id,
            capability_flags,
            character_set,
            status_flags,
            scramble,
            auth_plugin_name,
        })
    }
}

/// Handshake response 41, proxy -> backend
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: String,
}

impl HandshakeResponse {
    pub fn encode(&self, sequence_id: u8) -> Packet {
        let caps = self.capability_flags;
        let mut buf = BytesMut::with_capacity(64 + self.username.len());

        buf.put_u32_le(caps);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);
        buf.put_bytes(0, 23);

        buf.put_slice(self.username.as_bytes());
        buf.put_u8(0);

        if caps & CLIENT_SECURE_CONNECTION != 0 {
            buf.put_u8(self.auth_response.len() as u8);
            buf.put_slice(&self.auth_response);
        } else {
            buf.put_slice(&self.auth_response);
            buf.put_u8(0);
        }

        if caps & CLIENT_CONNECT_WITH_DB != 0 {
            buf.put_slice(self.database.as_deref().unwrap_or_default().as_bytes());
            buf.put_u8(0);
        }
        if caps & CLIENT_PLUGIN_AUTH != 0 {
            buf.put_slice(self.auth_plugin_name.as_bytes());
            buf.put_u8(0);
        }

        Packet::new(sequence_id, buf.freeze())
    }
}

fn sha1(parts: &[&[u8]]) -> [u8; SCRAMBLE_LEN] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    let mut digest = [0u8; SCRAMBLE_LEN];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// mysql_native_password scramble:
/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`
///
/// An empty password answers with an empty response.
pub fn compute_auth_response(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = sha1(&[password.as_bytes()]);
    let stage2 = sha1(&[&stage1[..]]);
    let mask = sha1(&[salt, &stage2[..]]);
    stage1.iter().zip(mask).map(|(a, b)| a ^ b).collect()
}

/// Check a client's scramble against the configured password
///
/// Compares in constant time.
pub fn verify_auth_response(password: &str, salt: &[u8], response: &[u8]) -> bool {
    let expected = compute_auth_response(password, salt);
    expected.len() == response.len()
        && expected
            .iter()
            .zip(response)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// OK packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn encode(&self, sequence_id: u8, capabilities: u32) -> Packet {
        let mut buf = BytesMut::with_capacity(11 + self.info.len());
        buf.put_u8(OK_HEADER);
        put_lenenc_int(&mut buf, self.affected_rows);
        put_lenenc_int(&mut buf, self.last_insert_id);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u16_le(self.status_flags);
            buf.put_u16_le(self.warnings);
        }
        buf.put_slice(self.info.as_bytes());
        Packet::new(sequence_id, buf.freeze())
    }

    pub fn parse(payload: &[u8], capabilities: u32) -> Option<Self> {
        let mut buf = payload.strip_prefix(&[OK_HEADER])?;
        let affected_rows = read_lenenc_int(&mut buf)?;
        let last_insert_id = read_lenenc_int(&mut buf)?;

        let mut ok = Self {
            affected_rows,
            last_insert_id,
            ..Default::default()
        };
        if capabilities & CLIENT_PROTOCOL_41 != 0 && buf.len() >= 4 {
            ok.status_flags = buf.get_u16_le();
            ok.warnings = buf.get_u16_le();
        }
        ok.info = String::from_utf8_lossy(buf).into_owned();
        Some(ok)
    }
}

/// EOF packet closing column definitions and rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() >= 9 {
            return None;
        }
        let mut buf = payload.strip_prefix(&[EOF_HEADER])?;
        if buf.len() < 4 {
            return Some(Self::default());
        }
        Some(Self {
            warnings: buf.get_u16_le(),
            status_flags: buf.get_u16_le(),
        })
    }
}

/// ERR packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, error_message: &str) -> Self {
        Self {
            error_code,
            sql_state: sql_state.to_string(),
            error_message: error_message.to_string(),
        }
    }

    pub fn encode(&self, sequence_id: u8, capabilities: u32) -> Packet {
        let mut buf = BytesMut::with_capacity(9 + self.error_message.len());
        buf.put_u8(ERR_HEADER);
        buf.put_u16_le(self.error_code);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u8(b'#');
            buf.put_slice(self.sql_state.as_bytes());
        }
        buf.put_slice(self.error_message.as_bytes());
        Packet::new(sequence_id, buf.freeze())
    }

    /// Decode an ERR payload; the state defaults to HY000 when absent
    pub fn parse(payload: &[u8], capabilities: u32) -> Option<Self> {
        let mut buf = payload.strip_prefix(&[ERR_HEADER])?;
        if buf.len() < 2 {
            return None;
        }
        let error_code = buf.get_u16_le();

        let mut sql_state = "HY000";
        let mut message = buf;
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            if let Some(rest) = buf.strip_prefix(b"#").filter(|rest| rest.len() >= 5) {
                sql_state = std::str::from_utf8(&rest[..5]).unwrap_or("HY000");
                message = &rest[5..];
            }
        }

        Some(Self::new(
            error_code,
            sql_state,
            &String::from_utf8_lossy(message),
        ))
    }
}

pub fn is_ok_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&OK_HEADER)
}

pub fn is_err_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

/// EOF packets are short 0xFE packets; never sent under CLIENT_DEPRECATE_EOF
pub fn is_eof_packet(payload: &[u8], capabilities: u32) -> bool {
    capabilities & CLIENT_DEPRECATE_EOF == 0 && payload.first() == Some(&EOF_HEADER) && payload.len() < 9
}

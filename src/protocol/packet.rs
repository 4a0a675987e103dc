use bytes::{Buf, BufMut, Bytes, BytesMut};

/// 3-byte little-endian payload length plus 1-byte sequence id
pub const PACKET_HEADER_SIZE: usize = 4;
/// Largest payload a single frame can carry
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// One MySQL wire frame
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(PACKET_HEADER_SIZE + self.payload.len());
        dst.put_uint_le(self.payload.len() as u64, 3);
        dst.put_u8(self.sequence_id);
        dst.put_slice(&self.payload);
    }

    /// Split one frame off `src`, or `None` until it is complete
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        let header = src.get(..PACKET_HEADER_SIZE)?;
        let len = (&header[..3]).get_uint_le(3) as usize;
        let sequence_id = header[3];
        if src.len() < PACKET_HEADER_SIZE + len {
            src.reserve(PACKET_HEADER_SIZE + len - src.len());
            return None;
        }

        src.advance(PACKET_HEADER_SIZE);
        Some(Self::new(sequence_id, src.split_to(len).freeze()))
    }
}

/// Capability flags negotiated with backends
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities requested from backends
    ///
    /// One statement per COM_QUERY, so no CLIENT_MULTI_STATEMENTS. Result
    /// sets end in EOF packets carrying warnings and status, so no
    /// CLIENT_DEPRECATE_EOF. LOCAL INFILE is refused.
    pub const DEFAULT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH;
}

/// Command bytes sent by clients (and by the proxy to backends)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Refresh = 0x07,
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    ProcessKill = 0x0c,
    Ping = 0x0e,
    ChangeUser = 0x11,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    ResetConnection = 0x1f,
    Unknown = 0xff,
}

impl Command {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Build a command packet (sequence 0) with the given argument bytes
    pub fn packet(self, arg: &[u8]) -> Packet {
        let mut payload = BytesMut::with_capacity(1 + arg.len());
        payload.put_u8(self.as_u8());
        payload.extend_from_slice(arg);
        Packet::new(0, payload.freeze())
    }
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Command::Sleep,
            0x01 => Command::Quit,
            0x02 => Command::InitDb,
            0x03 => Command::Query,
            0x04 => Command::FieldList,
            0x05 => Command::CreateDb,
            0x06 => Command::DropDb,
            0x07 => Command::Refresh,
            0x09 => Command::Statistics,
            0x0a => Command::ProcessInfo,
            0x0c => Command::ProcessKill,
            0x0e => Command::Ping,
            0x11 => Command::ChangeUser,
            0x16 => Command::StmtPrepare,
            0x17 => Command::StmtExecute,
            0x18 => Command::StmtSendLongData,
            0x19 => Command::StmtClose,
            0x1a => Command::StmtReset,
            0x1b => Command::SetOption,
            0x1c => Command::StmtFetch,
            0x1f => Command::ResetConnection,
            _ => Command::Unknown,
        }
    }
}

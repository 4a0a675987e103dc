pub mod codec;
pub mod column;
pub mod handshake;
pub mod packet;
pub mod resultset;
pub mod status;
pub mod wire;

pub use codec::PacketCodec;
pub use column::{parse_text_row, ColumnDefinition, MAX_COLUMNS};
pub use handshake::{
    compute_auth_response, is_eof_packet, is_err_packet, is_ok_packet, verify_auth_response,
    EofPacket, ErrPacket, HandshakeResponse, InitialHandshake, OkPacket,
};
pub use packet::{capabilities, Command, Packet};
pub use resultset::{ColumnInfo, ResultSet, Row};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, warn};

use crate::config::BackendConfig;
use crate::protocol::status::SERVER_MORE_RESULTS_EXISTS;
use crate::protocol::wire::read_lenenc_int;
use crate::protocol::{
    capabilities, compute_auth_response, is_eof_packet, is_err_packet, is_ok_packet,
    parse_text_row, ColumnDefinition, Command, EofPacket, ErrPacket, HandshakeResponse,
    InitialHandshake, OkPacket, Packet, PacketCodec, MAX_COLUMNS,
};

use super::result::{BackendError, NativeColumn, NativeOk, NativeResult, NativeRows};
use super::{BackendConn, Connector};

/// A MySQL backend connection speaking the text protocol
pub struct MySqlConnection {
    /// Underlying framed connection
    framed: Framed<TcpStream, PacketCodec>,
    /// Negotiated capability flags
    capabilities: u32,
    /// Current database
    database: Option<String>,
    /// Set once an I/O or protocol error leaves the stream in an unknown state
    closed: bool,
}

impl MySqlConnection {
    /// Create a new connection to a backend
    pub async fn connect(config: &BackendConfig, database: Option<&str>) -> Result<Self, BackendError> {
        let addr = config.addr();
        debug!(addr = %addr, "Connecting to backend");

        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to connect to backend");
            BackendError::Connect(e.to_string())
        })?;
        let mut framed = Framed::new(stream, PacketCodec);

        // Receive backend handshake
        let handshake_packet = framed
            .next()
            .await
            .ok_or(BackendError::Disconnected)?
            .map_err(|e| BackendError::Io(e.to_string()))?;

        if is_err_packet(&handshake_packet.payload) {
            let err = ErrPacket::parse(&handshake_packet.payload, 0)
                .unwrap_or_else(|| ErrPacket::new(1040, "08004", "Too many connections"));
            return Err(BackendError::Connect(err.error_message));
        }

        let backend_handshake = InitialHandshake::parse(&handshake_packet.payload)
            .ok_or_else(|| BackendError::Protocol("Invalid backend handshake".into()))?;

        debug!(
            server_version = %backend_handshake.server_version,
            connection_id = backend_handshake.connection_id,
            "Received backend handshake"
        );

        let auth_response =
            compute_auth_response(&config.password, &backend_handshake.scramble);

        let db = database
            .map(str::to_string)
            .or_else(|| config.database.clone());

        let mut caps = capabilities::DEFAULT_CAPABILITIES & backend_handshake.capability_flags;
        if db.is_some() {
            caps |= capabilities::CLIENT_CONNECT_WITH_DB;
        } else {
            caps &= !capabilities::CLIENT_CONNECT_WITH_DB;
        }

        let backend_response = HandshakeResponse {
            capability_flags: caps,
            max_packet_size: 16 * 1024 * 1024,
            character_set: 0x21, // utf8_general_ci
            username: config.user.clone(),
            auth_response,
            database: db.clone(),
            auth_plugin_name: backend_handshake.auth_plugin_name.clone(),
        };

        framed
            .send(backend_response.encode(1))
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;

        // Receive OK or ERR
        let response = framed
            .next()
            .await
            .ok_or(BackendError::Disconnected)?
            .map_err(|e| BackendError::Io(e.to_string()))?;

        if is_err_packet(&response.payload) {
            let err = ErrPacket::parse(&response.payload, caps)
                .unwrap_or_else(|| ErrPacket::new(1045, "28000", "Access denied"));
            error!(
                error_code = err.error_code,
                error_message = %err.error_message,
                "Backend authentication failed"
            );
            return Err(BackendError::Auth(err.error_message));
        }

        if !is_ok_packet(&response.payload) {
            // Auth switch and other plugins are not negotiated
            return Err(BackendError::Protocol(
                "Expected OK packet from backend".into(),
            ));
        }

        debug!(database = ?db, "Backend authentication successful");

        Ok(Self {
            framed,
            capabilities: caps,
            database: db,
            closed: false,
        })
    }

    /// Get backend capability flags
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// Send a packet to the backend
    async fn send(&mut self, packet: Packet) -> Result<(), BackendError> {
        match self.framed.send(packet).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.closed = true;
                Err(BackendError::Io(e.to_string()))
            }
        }
    }

    /// Receive a packet from the backend
    async fn recv(&mut self) -> Result<Packet, BackendError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.closed = true;
                Err(BackendError::Io(e.to_string()))
            }
            None => {
                self.closed = true;
                Err(BackendError::Disconnected)
            }
        }
    }

    /// Mark the stream unusable and build a protocol error
    fn protocol_error(&mut self, msg: &str) -> BackendError {
        self.closed = true;
        BackendError::Protocol(msg.to_string())
    }

    fn server_error(&self, payload: &[u8]) -> BackendError {
        let err = ErrPacket::parse(payload, self.capabilities)
            .unwrap_or_else(|| ErrPacket::new(1105, "HY000", "Unknown backend error"));
        BackendError::Server {
            code: err.error_code,
            sql_state: err.sql_state,
            message: err.error_message,
        }
    }

    /// Send a command whose only answer is OK or ERR
    async fn simple_command(&mut self, cmd: Command, arg: &[u8]) -> Result<OkPacket, BackendError> {
        self.send(cmd.packet(arg)).await?;
        let response = self.recv().await?;

        if is_err_packet(&response.payload) {
            return Err(self.server_error(&response.payload));
        }
        match OkPacket::parse(&response.payload, self.capabilities) {
            Some(ok) => Ok(ok),
            None => Err(self.protocol_error("Expected OK packet")),
        }
    }

    /// Read column definitions up to the terminating EOF
    async fn read_columns(&mut self, count: Option<usize>, with_default: bool) -> Result<Vec<ColumnDefinition>, BackendError> {
        let mut columns = Vec::with_capacity(count.unwrap_or(8).min(MAX_COLUMNS));
        loop {
            let packet = self.recv().await?;
            if is_eof_packet(&packet.payload, self.capabilities) {
                break;
            }
            if is_err_packet(&packet.payload) {
                return Err(self.server_error(&packet.payload));
            }
            match ColumnDefinition::parse(&packet.payload, with_default) {
                Some(column) => columns.push(column),
                None => return Err(self.protocol_error("Malformed column definition")),
            }
        }

        if let Some(expected) = count {
            if columns.len() != expected {
                return Err(self.protocol_error("Column count mismatch"));
            }
        }
        Ok(columns)
    }

    /// Read one text result set after its column-count packet
    async fn read_rows(&mut self, column_count: usize) -> Result<NativeRows, BackendError> {
        let columns = self.read_columns(Some(column_count), false).await?;

        let mut rows = Vec::new();
        loop {
            let packet = self.recv().await?;
            if is_eof_packet(&packet.payload, self.capabilities) {
                let eof = EofPacket::parse(&packet.payload).unwrap_or_default();
                return Ok(NativeRows {
                    columns,
                    rows,
                    status_flags: eof.status_flags,
                    warnings: eof.warnings,
                });
            }
            if is_err_packet(&packet.payload) {
                return Err(self.server_error(&packet.payload));
            }
            match parse_text_row(&packet.payload, column_count) {
                Some(row) => rows.push(row),
                None => return Err(self.protocol_error("Malformed text row")),
            }
        }
    }
}

#[async_trait]
impl BackendConn for MySqlConnection {
    fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Change current database (COM_INIT_DB)
    async fn use_database(&mut self, db: &str) -> Result<(), BackendError> {
        self.simple_command(Command::InitDb, db.as_bytes()).await?;
        self.database = Some(db.to_string());
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<Vec<NativeResult>, BackendError> {
        self.send(Command::Query.packet(sql.as_bytes())).await?;

        let mut results = Vec::new();
        loop {
            let first = self.recv().await?;
            let payload = &first.payload;

            let result = if is_err_packet(payload) {
                return Err(self.server_error(payload));
            } else if is_ok_packet(payload) {
                match OkPacket::parse(payload, self.capabilities) {
                    Some(ok) => NativeResult::Ok(NativeOk {
                        affected_rows: ok.affected_rows,
                        last_insert_id: ok.last_insert_id,
                        status_flags: ok.status_flags,
                        warnings: ok.warnings,
                        info: ok.info,
                    }),
                    None => return Err(self.protocol_error("Malformed OK packet")),
                }
            } else if payload.first() == Some(&0xFB) {
                // LOCAL INFILE request; the client's file is not reachable from here
                return Err(self.protocol_error("LOAD DATA LOCAL INFILE is not supported"));
            } else {
                let mut buf = &payload[..];
                match read_lenenc_int(&mut buf) {
                    Some(count) if count > 0 && count <= MAX_COLUMNS as u64 => {
                        NativeResult::Rows(self.read_rows(count as usize).await?)
                    }
                    _ => return Err(self.protocol_error("Malformed column count")),
                }
            };

            let more = result.status_flags() & SERVER_MORE_RESULTS_EXISTS != 0;
            results.push(result);
            if !more {
                return Ok(results);
            }
        }
    }

    async fn field_list(&mut self, table: &str) -> Result<Vec<NativeColumn>, BackendError> {
        // Table name is NUL-terminated, followed by an empty wildcard
        let mut arg = Vec::with_capacity(table.len() + 1);
        arg.extend_from_slice(table.as_bytes());
        arg.push(0);

        self.send(Command::FieldList.packet(&arg)).await?;
        self.read_columns(None, true).await
    }

    /// Reset connection state (COM_RESET_CONNECTION)
    async fn reset(&mut self) -> bool {
        match self.simple_command(Command::ResetConnection, &[]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Failed to reset backend connection");
                self.closed = true;
                false
            }
        }
    }

    fn is_usable(&self) -> bool {
        !self.closed
    }
}

/// Opens `MySqlConnection`s to one backend
#[derive(Clone)]
pub struct MySqlConnector {
    backend: Arc<BackendConfig>,
}

impl MySqlConnector {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Get backend address (host:port)
    pub fn backend_addr(&self) -> String {
        self.backend.addr()
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Conn = MySqlConnection;

    async fn connect(&self, database: Option<&str>) -> Result<MySqlConnection, BackendError> {
        MySqlConnection::connect(&self.backend, database).await
    }
}

use crate::pool::NativeOk;
use crate::protocol::status::{
    SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS, SESSION_OWNED_STATUS,
};
use crate::protocol::{Command, OkPacket};

/// Session state tracking
///
/// The in-transaction and autocommit bits are owned here; every other
/// status bit mirrors the most recent backend response.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Server status flags reported to the client
    status: u16,
    last_insert_id: u64,
    affected_rows: u64,
    /// Warnings of the last statement
    warnings: u16,
    /// Last human-readable status message (e.g. "Rows matched: 1")
    message: String,
    /// Client capability flags
    capability_flags: u32,
    /// Last command byte processed
    command: u8,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: SERVER_STATUS_AUTOCOMMIT,
            last_insert_id: 0,
            affected_rows: 0,
            warnings: 0,
            message: String::new(),
            capability_flags: 0,
            command: Command::Sleep.as_u8(),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn has_status(&self, flag: u16) -> bool {
        self.status & flag != 0
    }

    fn set_status_flag(&mut self, flag: u16, on: bool) {
        if on {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.has_status(SERVER_STATUS_IN_TRANS)
    }

    pub fn set_in_transaction(&mut self, on: bool) {
        self.set_status_flag(SERVER_STATUS_IN_TRANS, on);
    }

    pub fn autocommit(&self) -> bool {
        self.has_status(SERVER_STATUS_AUTOCOMMIT)
    }

    pub fn set_autocommit(&mut self, on: bool) {
        self.set_status_flag(SERVER_STATUS_AUTOCOMMIT, on);
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn capability(&self) -> u32 {
        self.capability_flags
    }

    pub fn set_capability(&mut self, flags: u32) {
        self.capability_flags = flags;
    }

    pub fn command(&self) -> Command {
        Command::from(self.command)
    }

    pub fn set_command(&mut self, cmd: u8) {
        self.command = cmd;
    }

    /// Adopt the backend's non-session status bits
    fn merge_backend_status(&mut self, backend: u16) {
        // MORE_RESULTS is set per result set by the encoder, never kept
        let session_bits = self.status & (SERVER_STATUS_IN_TRANS | SERVER_STATUS_AUTOCOMMIT);
        self.status = session_bits | (backend & !SESSION_OWNED_STATUS);
    }

    /// Record the outcome of a statement that returned no rows
    ///
    /// The last insert id persists until a statement generates a new one.
    pub fn apply_ok(&mut self, ok: &NativeOk) {
        self.affected_rows = ok.affected_rows;
        if ok.last_insert_id != 0 {
            self.last_insert_id = ok.last_insert_id;
        }
        self.warnings = ok.warnings;
        self.message = ok.info.clone();
        self.merge_backend_status(ok.status_flags);
    }

    /// Record the outcome of a statement that returned a result set
    pub fn apply_rows(&mut self, status_flags: u16, warnings: u16) {
        self.affected_rows = 0;
        self.warnings = warnings;
        self.message.clear();
        self.merge_backend_status(status_flags);
    }

    /// Record a statement that changed no rows and reported nothing
    pub fn clear_result(&mut self) {
        self.affected_rows = 0;
        self.warnings = 0;
        self.message.clear();
    }

    /// Record a statement that failed on the backend
    pub fn apply_error(&mut self, message: &str) {
        self.clear_result();
        self.message = message.to_string();
    }

    /// OK packet describing the last statement
    pub fn ok_packet(&self) -> OkPacket {
        OkPacket {
            affected_rows: self.affected_rows,
            last_insert_id: self.last_insert_id,
            status_flags: self.status,
            warnings: self.warnings,
            info: self.message.clone(),
        }
    }
}

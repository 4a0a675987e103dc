//! Transaction pin slot
//!
//! Every transition of a context's backend connection happens under one
//! lock. Whoever takes a connection out of the slot owns its release;
//! the release I/O itself runs after the lock is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::metrics::metrics;
use crate::pool::PooledBackendConn;

use super::QueryError;

enum PinState {
    /// No statement running, no transaction connection
    Empty,
    /// Between statements of a transaction
    Pinned(Box<dyn PooledBackendConn>),
    /// A statement owns the connection (if any) until it finishes
    CheckedOut,
    /// Closed; statements still running release what they hold
    Closed,
}

#[derive(Clone)]
pub(crate) struct PinSlot {
    state: Arc<Mutex<PinState>>,
    conn_id: u32,
}

impl PinSlot {
    pub(crate) fn new(conn_id: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(PinState::Empty)),
            conn_id,
        }
    }

    /// Claim the slot for one statement, taking the pinned connection
    pub(crate) fn checkout(&self) -> Result<Checkout, QueryError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, PinState::CheckedOut) {
            PinState::Empty => Ok(Checkout::new(self.clone(), None)),
            PinState::Pinned(conn) => Ok(Checkout::new(self.clone(), Some(conn))),
            PinState::CheckedOut => Err(QueryError::InFlight),
            PinState::Closed => {
                *state = PinState::Closed;
                Err(QueryError::Closed)
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), PinState::Closed)
    }

    /// Identity of the pinned connection, if any
    pub(crate) fn pinned_id(&self) -> Option<u64> {
        match &*self.state.lock() {
            PinState::Pinned(conn) => Some(conn.id()),
            _ => None,
        }
    }

    /// Move to `Closed`, releasing a pinned connection
    ///
    /// Returns false if the slot was already closed.
    pub(crate) async fn close(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), PinState::Closed);
        match previous {
            PinState::Closed => false,
            PinState::Pinned(conn) => {
                debug!(conn_id = self.conn_id, backend_conn = conn.id(), "Releasing pinned connection on close");
                metrics().record_unpin();
                conn.release().await;
                true
            }
            PinState::CheckedOut => {
                debug!(conn_id = self.conn_id, "Close during statement, connection released when it finishes");
                true
            }
            PinState::Empty => true,
        }
    }
}

/// One statement's claim on the slot
///
/// Dropping a checkout without `finish` (a cancelled future) returns the
/// slot to `Empty` and discards the connection it held.
pub(crate) struct Checkout {
    slot: PinSlot,
    conn: Option<Box<dyn PooledBackendConn>>,
    was_pinned: bool,
    finished: bool,
}

impl Checkout {
    fn new(slot: PinSlot, conn: Option<Box<dyn PooledBackendConn>>) -> Self {
        Self {
            slot,
            was_pinned: conn.is_some(),
            conn,
            finished: false,
        }
    }

    pub(crate) fn was_pinned(&self) -> bool {
        self.was_pinned
    }

    pub(crate) fn set(&mut self, conn: Box<dyn PooledBackendConn>) {
        self.conn = Some(conn);
    }

    pub(crate) fn conn_mut(&mut self) -> Option<&mut Box<dyn PooledBackendConn>> {
        self.conn.as_mut()
    }

    /// Give the slot back, pinning the connection or releasing it
    ///
    /// A slot closed while the statement ran always releases.
    pub(crate) async fn finish(mut self, keep_pinned: bool) {
        self.finished = true;
        let conn = self.conn.take();

        let to_release = {
            let mut state = self.slot.state.lock();
            let closed = matches!(*state, PinState::Closed);
            match conn {
                Some(conn) if keep_pinned && !closed => {
                    if !self.was_pinned {
                        debug!(conn_id = self.slot.conn_id, backend_conn = conn.id(), "Pinned backend connection");
                        metrics().record_pin();
                    }
                    *state = PinState::Pinned(conn);
                    return;
                }
                conn => {
                    if !closed {
                        *state = PinState::Empty;
                    }
                    conn
                }
            }
        };

        if self.was_pinned {
            metrics().record_unpin();
        }
        if let Some(conn) = to_release {
            debug!(conn_id = self.slot.conn_id, backend_conn = conn.id(), "Releasing backend connection");
            conn.release().await;
        }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.slot.state.lock();
        if matches!(*state, PinState::CheckedOut) {
            *state = PinState::Empty;
        }
        drop(state);

        if self.was_pinned {
            metrics().record_unpin();
        }
        if self.conn.is_some() {
            warn!(conn_id = self.slot.conn_id, "Statement abandoned, discarding backend connection");
        }
    }
}

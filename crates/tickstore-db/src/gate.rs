//! Serialized access to the store connection.
//!
//! Every commit takes a ticket when it is handed off. Workers then run
//! commits strictly in ticket order, one at a time, no matter how many
//! workers the scheduler has. A ticket whose commit task is dropped before
//! running is abandoned so later tickets are not stuck behind it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};
use rusqlite::Connection;

use crate::error::StoreError;

struct GateState {
    conn: Option<Connection>,
    now_serving: u64,
    abandoned: BTreeSet<u64>,
}

impl GateState {
    fn advance(&mut self) {
        self.now_serving = self.now_serving.wrapping_add(1);
        while self.abandoned.remove(&self.now_serving) {
            self.now_serving = self.now_serving.wrapping_add(1);
        }
    }
}

/// Owner of the store connection.
pub(crate) struct ConnectionGate {
    state: Mutex<GateState>,
    turn: Condvar,
    next_ticket: AtomicU64,
}

/// Exclusive, in-order access to the connection for one commit.
///
/// Dropping it passes the turn to the next ticket.
pub(crate) struct GateTurn<'a> {
    gate: &'a ConnectionGate,
    state: MutexGuard<'a, GateState>,
}

impl GateTurn<'_> {
    /// The connection, unless the store is closed.
    pub(crate) fn connection(&mut self) -> Option<&mut Connection> {
        self.state.conn.as_mut()
    }
}

impl Drop for GateTurn<'_> {
    fn drop(&mut self) {
        self.state.advance();
        self.gate.turn.notify_all();
    }
}

impl ConnectionGate {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                conn: None,
                now_serving: 0,
                abandoned: BTreeSet::new(),
            }),
            turn: Condvar::new(),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Reserve the next place in commit order.
    pub(crate) fn issue_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::AcqRel)
    }

    /// Block until every earlier ticket has been served or abandoned.
    pub(crate) fn wait_turn(&self, ticket: u64) -> GateTurn<'_> {
        let mut state = self.lock();
        self.turn
            .wait_while(&mut state, |state| state.now_serving != ticket);
        GateTurn { gate: self, state }
    }

    /// Give up a ticket that will never be served.
    pub(crate) fn abandon(&self, ticket: u64) {
        let mut state = self.lock();
        if state.now_serving == ticket {
            state.advance();
            drop(state);
            self.turn.notify_all();
        } else {
            state.abandoned.insert(ticket);
        }
    }

    /// Run `f` against the connection, outside ticket order.
    ///
    /// Used on the owner thread for reads, flips and lifecycle changes.
    /// Waits only for a commit currently holding the connection.
    pub(crate) fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut state = self.lock();
        let conn = state.conn.as_mut().ok_or(StoreError::Unusable)?;
        f(conn)
    }

    /// Install a freshly opened connection, returning the previous one.
    pub(crate) fn install(&self, conn: Connection) -> Option<Connection> {
        self.lock().conn.replace(conn)
    }

    /// Remove the connection.
    pub(crate) fn take(&self) -> Option<Connection> {
        self.lock().conn.take()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock()
    }
}

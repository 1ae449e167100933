//! The [`EntityStore`]: double-buffered write-back persistence.
//!
//! # Live table
//!
//! The store keeps two physical tables. Exactly one is live and holds a
//! complete snapshot; the marker row names it. Ordinary commits write
//! through to the live table. A rebuild commit replaces the entire contents
//! of the other table, and only after it succeeds does the owner thread
//! flip: the marker is updated first, then the in-memory pointer.
//!
//! ```text
//! write() --append--> accumulating Transaction
//!                          |
//!                     commit() (owner thread, once per tick)
//!                          |
//!                          v
//!     CommitTask --worker--> gate turn --> SQL transaction on target table
//!                          |
//!                     tick() (owner thread)
//!                          |
//!                          v
//!         flip() if rebuild, notify rows, release to pool
//! ```
//!
//! # Recovery
//!
//! The marker is authoritative. If the process dies after a rebuild commit
//! but before the flip, the old live table is still named by the marker and
//! is still complete, so the store reopens on it. The other table is
//! cleared by the next rebuild commit.
//!
//! A marker row that is missing or cannot be decoded is treated like a new
//! store: both tables are cleared and the first commit rebuilds. A file that
//! is not a database still fails closed.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tickstore_scheduler::{BackgroundOutcome, Task, TaskScheduler, TickReport};
use tracing::{debug, error, info, warn};

use crate::completion::Completion;
use crate::config::StoreConfig;
use crate::error::{StoreError, WriteError};
use crate::gate::ConnectionGate;
use crate::pool::TransactionPool;
use crate::record::{RecordId, RecordTypeId, SchemaChecksum};
use crate::row::Row;
use crate::schema::{self, Marker, StoredRecord, TableSlot};
use crate::transaction::{Transaction, TransactionState};

// =============================================================================
// Public status types
// =============================================================================

/// Lifecycle state of an [`EntityStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    /// `init` has not succeeded yet.
    Uninitialized,
    /// The store is open but has no trusted snapshot; the next commit is a
    /// rebuild.
    RebuildRequired,
    /// The live table holds a complete snapshot.
    Ready,
    /// Checksum mismatch, corruption or a fatal connection failure.
    Unusable,
}

impl StoreStatus {
    /// Whether `write` and `commit` are accepted in this state.
    pub const fn accepts_writes(self) -> bool {
        matches!(self, Self::RebuildRequired | Self::Ready)
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::RebuildRequired => 1,
            Self::Ready => 2,
            Self::Unusable => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::RebuildRequired,
            2 => Self::Ready,
            _ => Self::Unusable,
        }
    }
}

/// What a call to [`EntityStore::commit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A transaction was handed to the scheduler.
    Submitted {
        /// Rows in the transaction.
        rows: usize,
        /// Table the transaction will be written to.
        table: TableSlot,
        /// Whether this commit replaces the non-live table and flips.
        rebuild: bool,
    },
    /// Nothing was written since the last commit.
    Empty,
    /// A rebuild commit is still in flight; rows keep accumulating.
    Deferred,
}

/// Snapshot of store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Rows reported as committed.
    pub rows_written: u64,
    /// Rows reported as failed or discarded.
    pub rows_failed: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions that failed.
    pub failed_commits: u64,
    /// Live-table flips.
    pub flips: u64,
    /// Commits handed off but not yet completed on the owner thread.
    pub in_flight: usize,
    /// Transactions the pool has constructed.
    pub pool_created: u64,
    /// Transactions on the pool's free list.
    pub pool_free: usize,
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Default)]
struct StoreCounters {
    rows_written: AtomicU64,
    rows_failed: AtomicU64,
    commits: AtomicU64,
    failed_commits: AtomicU64,
    flips: AtomicU64,
}

impl StoreCounters {
    fn record_rows(&self, rows: usize, ok: bool) {
        let rows = u64::try_from(rows).unwrap_or(u64::MAX);
        if ok {
            self.rows_written.fetch_add(rows, Ordering::Relaxed);
        } else {
            self.rows_failed.fetch_add(rows, Ordering::Relaxed);
        }
    }
}

struct StoreShared {
    config: StoreConfig,
    gate: ConnectionGate,
    pool: TransactionPool,
    accumulating: Mutex<Option<Transaction>>,
    live: AtomicU8,
    status: AtomicU8,
    should_flip: AtomicBool,
    rebuild_in_flight: AtomicBool,
    in_flight: AtomicUsize,
    counters: StoreCounters,
}

impl StoreShared {
    fn status(&self) -> StoreStatus {
        StoreStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: StoreStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    fn live(&self) -> TableSlot {
        TableSlot::from_u8(self.live.load(Ordering::Acquire))
    }

    fn lock_accumulating(&self) -> MutexGuard<'_, Option<Transaction>> {
        self.accumulating.lock()
    }

    /// Fail every row accumulated since the last commit.
    fn fail_accumulating(&self, error: &WriteError) {
        let taken = self.lock_accumulating().take();
        if let Some(mut tx) = taken {
            self.counters.record_rows(tx.len(), false);
            tx.mark_failed(error.clone());
            tx.notify_completions();
            self.pool.release(tx);
        }
    }

    /// Mark the store unusable after a fatal failure.
    fn poison(&self, err: &StoreError) {
        error!(error = %err, "store is no longer usable");
        self.set_status(StoreStatus::Unusable);
    }

    /// Make `target` the live table: marker first, then the pointer.
    fn flip(&self, target: TableSlot) -> Result<(), StoreError> {
        if self.status() == StoreStatus::Unusable {
            return Err(StoreError::Unusable);
        }
        let from = self.live();
        if let Err(err) = self
            .gate
            .with_connection(|conn| schema::set_live(conn, target))
        {
            self.poison(&err);
            return Err(err);
        }

        self.live.store(target.to_u8(), Ordering::Release);
        self.counters.flips.fetch_add(1, Ordering::Relaxed);
        // A first rebuild turns a fresh store into a ready one.
        let _ = self.status.compare_exchange(
            StoreStatus::RebuildRequired.to_u8(),
            StoreStatus::Ready.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        info!(from = %from, to = %target, "live table flipped");
        Ok(())
    }

    /// Report a finished transaction to its rows and return it to the pool.
    fn finish(&self, mut tx: Transaction) {
        let ok = matches!(tx.state(), TransactionState::Committed);
        self.counters.record_rows(tx.len(), ok);
        if ok {
            self.counters.commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed_commits.fetch_add(1, Ordering::Relaxed);
        }
        tx.notify_completions();
        self.pool.release(tx);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// EntityStore
// =============================================================================

/// Double-buffered write-back store of entity snapshots.
///
/// `write` may be called from any thread. `commit`, `tick`, `init`, `reset`
/// and `close` belong to the scheduler's owner thread.
pub struct EntityStore {
    shared: Arc<StoreShared>,
    scheduler: Arc<TaskScheduler>,
}

impl EntityStore {
    /// Create a store that commits through `scheduler`.
    ///
    /// Nothing is opened until [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if `config` is invalid.
    pub fn new(config: StoreConfig, scheduler: Arc<TaskScheduler>) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(StoreShared {
                config,
                gate: ConnectionGate::new(),
                pool: TransactionPool::new(),
                accumulating: Mutex::new(None),
                live: AtomicU8::new(TableSlot::A.to_u8()),
                status: AtomicU8::new(StoreStatus::Uninitialized.to_u8()),
                should_flip: AtomicBool::new(false),
                rebuild_in_flight: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                counters: StoreCounters::default(),
            }),
            scheduler,
        })
    }

    /// Open the store and validate its marker against `expected`.
    ///
    /// A missing or unreadable marker row clears both tables and leaves the
    /// store in [`StoreStatus::RebuildRequired`]. Returns `false` if the
    /// store is unusable: checksum mismatch, a corrupt file or an unopenable
    /// one. The caller is expected to rebuild, typically via
    /// [`reset`](Self::reset).
    pub fn init(&self, expected: SchemaChecksum) -> bool {
        match self.try_init(expected) {
            Ok(status) => {
                debug!(?status, "store initialized");
                true
            }
            Err(err) => {
                warn!(error = %err, "store init failed");
                false
            }
        }
    }

    /// Like [`init`](Self::init), but reports why the store is unusable.
    ///
    /// # Errors
    ///
    /// [`StoreError::Busy`] if commits are still in flight,
    /// [`StoreError::ChecksumMismatch`] for a marker written under another
    /// schema, and database or I/O errors from opening the file.
    pub fn try_init(&self, expected: SchemaChecksum) -> Result<StoreStatus, StoreError> {
        self.ensure_idle()?;
        self.shared.set_status(StoreStatus::Uninitialized);
        drop(self.shared.gate.take());

        match self.open_and_validate(expected) {
            Ok(status) => {
                self.shared.set_status(status);
                Ok(status)
            }
            Err(err) => {
                self.shared.set_status(StoreStatus::Unusable);
                self.shared.fail_accumulating(&WriteError::StoreUnusable);
                Err(err)
            }
        }
    }

    fn open_and_validate(&self, expected: SchemaChecksum) -> Result<StoreStatus, StoreError> {
        let config = &self.shared.config;
        let mut conn = schema::open_connection(config)?;
        schema::ensure_schema(&conn, config)?;

        let marker = match schema::read_marker(&conn) {
            Ok(marker) => marker,
            Err(StoreError::Corrupt { message }) => {
                warn!(%message, "marker row unreadable, treating both tables as empty");
                None
            }
            Err(err) => return Err(err),
        };

        let (live, status) = match marker {
            None => {
                let sql = conn.transaction()?;
                for slot in [TableSlot::A, TableSlot::B] {
                    schema::clear_table(&sql, &config.table_name(slot))?;
                }
                schema::write_marker(&sql, expected, TableSlot::A)?;
                sql.commit()?;
                info!(checksum = %expected, "marker written, rebuild required");
                (TableSlot::A, StoreStatus::RebuildRequired)
            }
            Some(marker) if marker.checksum != expected => {
                warn!(expected = %expected, found = %marker.checksum, "schema checksum mismatch");
                return Err(StoreError::ChecksumMismatch {
                    expected,
                    found: marker.checksum,
                });
            }
            Some(marker) => {
                info!(checksum = %expected, live = %marker.live, "schema checksum validated");
                (marker.live, StoreStatus::Ready)
            }
        };

        self.install(conn, live);
        Ok(status)
    }

    /// Drop all stored data and start over with checksum `expected`.
    ///
    /// The store comes back in [`StoreStatus::RebuildRequired`]. A file that
    /// cannot be opened as a database is deleted and recreated.
    ///
    /// # Errors
    ///
    /// [`StoreError::Busy`] if commits are still in flight, otherwise
    /// database or I/O errors.
    pub fn reset(&self, expected: SchemaChecksum) -> Result<(), StoreError> {
        self.ensure_idle()?;
        self.shared.set_status(StoreStatus::Uninitialized);
        drop(self.shared.gate.take());

        match self.recreate(expected) {
            Ok(conn) => {
                self.install(conn, TableSlot::A);
                self.shared.set_status(StoreStatus::RebuildRequired);
                info!(checksum = %expected, "store reset, rebuild required");
                Ok(())
            }
            Err(err) => {
                self.shared.poison(&err);
                Err(err)
            }
        }
    }

    fn recreate(&self, expected: SchemaChecksum) -> Result<rusqlite::Connection, StoreError> {
        match self.rewrite_store(expected) {
            Err(err) if err.is_fatal() => {
                warn!(error = %err, "store file unreadable, recreating");
                schema::remove_store_files(&self.shared.config)?;
                self.rewrite_store(expected)
            }
            other => other,
        }
    }

    fn rewrite_store(&self, expected: SchemaChecksum) -> Result<rusqlite::Connection, StoreError> {
        let config = &self.shared.config;
        let mut conn = schema::open_connection(config)?;
        let sql = conn.transaction()?;
        schema::drop_all(&sql, config)?;
        schema::ensure_schema(&sql, config)?;
        schema::write_marker(&sql, expected, TableSlot::A)?;
        sql.commit()?;
        Ok(conn)
    }

    fn install(&self, conn: rusqlite::Connection, live: TableSlot) {
        self.shared.live.store(live.to_u8(), Ordering::Release);
        self.shared.should_flip.store(false, Ordering::Release);
        self.shared.rebuild_in_flight.store(false, Ordering::Release);
        drop(self.shared.gate.install(conn));
    }

    fn ensure_idle(&self) -> Result<(), StoreError> {
        let in_flight = self.shared.in_flight.load(Ordering::Acquire);
        if in_flight > 0 {
            return Err(StoreError::Busy { in_flight });
        }
        Ok(())
    }

    /// Queue one record snapshot for the next commit.
    ///
    /// Never blocks on I/O and never fails synchronously: the outcome is
    /// delivered to `completion`. If the store is not usable the completion
    /// fires immediately with [`WriteError::StoreUnusable`].
    pub fn write(
        &self,
        record_id: RecordId,
        record_type_id: RecordTypeId,
        timestamp: DateTime<Utc>,
        payload: Vec<u8>,
        completion: Completion,
    ) {
        self.push_row(Row::new(
            record_id,
            record_type_id,
            timestamp,
            payload,
            completion,
        ));
    }

    /// Serialize `value` as JSON and queue it like [`write`](Self::write).
    ///
    /// A value that fails to serialize fails the whole batch it joins.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        record_id: RecordId,
        record_type_id: RecordTypeId,
        timestamp: DateTime<Utc>,
        value: &T,
        completion: Completion,
    ) {
        let row = match serde_json::to_vec(value) {
            Ok(payload) => Row::new(record_id, record_type_id, timestamp, payload, completion),
            Err(err) => Row::rejected(
                record_id,
                record_type_id,
                timestamp,
                WriteError::Serialization {
                    message: err.to_string(),
                },
                completion,
            ),
        };
        self.push_row(row);
    }

    fn push_row(&self, row: Row) {
        if !self.status().accepts_writes() {
            self.shared.counters.record_rows(1, false);
            row.on_write_to_db_complete(Err(WriteError::StoreUnusable));
            return;
        }

        let mut accumulating = self.shared.lock_accumulating();
        let tx = accumulating.get_or_insert_with(|| self.shared.pool.acquire());
        if let Err(row) = tx.append(row) {
            drop(accumulating);
            row.on_write_to_db_complete(Err(WriteError::Fault {
                message: String::from("accumulating transaction was frozen"),
            }));
        }
    }

    /// Request that the next commit rebuild the non-live table and flip.
    ///
    /// The caller is expected to write a complete snapshot before that
    /// commit, since the target table is cleared first.
    pub fn begin_rebuild(&self) {
        debug!(live = %self.live_table(), "rebuild requested");
        self.shared.should_flip.store(true, Ordering::Release);
    }

    /// Hand the accumulating transaction to the scheduler.
    ///
    /// Call at most once per tick, on the owner thread. An ordinary commit
    /// targets the live table. A rebuild commit, requested with
    /// [`begin_rebuild`](Self::begin_rebuild) or forced while the store is
    /// [`StoreStatus::RebuildRequired`], targets the other table and is
    /// submitted even when empty.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unusable`] if the store is not usable; rows accumulated
    /// since the last commit are failed with [`WriteError::StoreUnusable`].
    pub fn commit(&self) -> Result<CommitOutcome, StoreError> {
        debug_assert!(
            self.scheduler.is_owner_thread(),
            "EntityStore::commit called off the owner thread"
        );

        let status = self.status();
        if !status.accepts_writes() {
            self.shared.fail_accumulating(&WriteError::StoreUnusable);
            return Err(StoreError::Unusable);
        }
        if self.shared.rebuild_in_flight.load(Ordering::Acquire) {
            return Ok(CommitOutcome::Deferred);
        }

        let rebuild = status == StoreStatus::RebuildRequired
            || self.shared.should_flip.load(Ordering::Acquire);
        let taken = self.shared.lock_accumulating().take();
        let mut tx = match taken {
            Some(tx) => tx,
            None if rebuild => self.shared.pool.acquire(),
            None => return Ok(CommitOutcome::Empty),
        };

        if rebuild {
            self.shared.should_flip.store(false, Ordering::Release);
            self.shared.rebuild_in_flight.store(true, Ordering::Release);
        }
        let live = self.shared.live();
        let target = if rebuild { live.other() } else { live };

        tx.freeze();
        let rows = tx.len();
        let ticket = self.shared.gate.issue_ticket();
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        debug!(
            transaction_id = tx.id(),
            rows,
            table = %target,
            rebuild,
            ticket,
            "transaction handed off"
        );

        self.scheduler.submit(
            CommitTask {
                shared: Arc::clone(&self.shared),
                transaction: Some(tx),
                ticket,
                target,
                rebuild,
                ran: false,
            },
            self.shared.config.commit_priority,
        );

        Ok(CommitOutcome::Submitted {
            rows,
            table: target,
            rebuild,
        })
    }

    /// Run pending foreground work, including commit notifications and
    /// flips. Delegates to [`TaskScheduler::tick`].
    pub fn tick(&self) -> TickReport {
        self.scheduler.tick()
    }

    /// The table currently holding the live snapshot.
    pub fn live_table(&self) -> TableSlot {
        self.shared.live()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> StoreStatus {
        self.shared.status()
    }

    /// Whether the next commit will be forced to rebuild.
    pub fn needs_rebuild(&self) -> bool {
        self.status() == StoreStatus::RebuildRequired
    }

    /// Whether a rebuild commit has been handed off and not yet completed.
    /// While set, [`commit`](Self::commit) returns
    /// [`CommitOutcome::Deferred`].
    pub fn rebuild_in_flight(&self) -> bool {
        self.shared.rebuild_in_flight.load(Ordering::Acquire)
    }

    /// Commits handed off but not yet completed on the owner thread.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Read one record from the live table.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unusable`] if the store is not open, otherwise
    /// database errors.
    pub fn read_live(
        &self,
        record_type_id: RecordTypeId,
        record_id: RecordId,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let table = self.readable_live_table()?;
        self.shared
            .gate
            .with_connection(|conn| schema::read_record(conn, &table, record_type_id, record_id))
    }

    /// Read the whole live snapshot, ordered by type then id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unusable`] if the store is not open, otherwise
    /// database errors.
    pub fn live_records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let table = self.readable_live_table()?;
        self.shared
            .gate
            .with_connection(|conn| schema::read_all(conn, &table))
    }

    /// The marker row as currently stored.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unusable`] if no connection is open, otherwise
    /// database errors.
    pub fn marker(&self) -> Result<Option<Marker>, StoreError> {
        self.shared.gate.with_connection(|conn| schema::read_marker(conn))
    }

    /// Number of rows in the table behind `slot`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unusable`] if no connection is open, otherwise
    /// database errors.
    pub fn row_count(&self, slot: TableSlot) -> Result<u64, StoreError> {
        let table = self.shared.config.table_name(slot);
        self.shared
            .gate
            .with_connection(|conn| schema::count(conn, &table))
    }

    fn readable_live_table(&self) -> Result<String, StoreError> {
        if !self.status().accepts_writes() {
            return Err(StoreError::Unusable);
        }
        Ok(self.shared.config.table_name(self.live_table()))
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        let counters = &self.shared.counters;
        StoreStats {
            rows_written: counters.rows_written.load(Ordering::Relaxed),
            rows_failed: counters.rows_failed.load(Ordering::Relaxed),
            commits: counters.commits.load(Ordering::Relaxed),
            failed_commits: counters.failed_commits.load(Ordering::Relaxed),
            flips: counters.flips.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            pool_created: self.shared.pool.created(),
            pool_free: self.shared.pool.free_len(),
        }
    }

    /// The configuration the store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// The scheduler commits run on.
    pub const fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Close the connection. Rows not yet committed report
    /// [`WriteError::Discarded`].
    ///
    /// # Errors
    ///
    /// [`StoreError::Busy`] if commits are still in flight; shut the
    /// scheduler down first.
    pub fn close(&self) -> Result<(), StoreError> {
        self.ensure_idle()?;
        self.shared.set_status(StoreStatus::Uninitialized);
        self.shared.fail_accumulating(&WriteError::Discarded);
        if self.shared.gate.take().is_some() {
            info!(path = %self.shared.config.path().display(), "store closed");
        }
        Ok(())
    }
}

// =============================================================================
// Commit task
// =============================================================================

/// Background commit of one transaction, foreground notification and flip.
struct CommitTask {
    shared: Arc<StoreShared>,
    transaction: Option<Transaction>,
    ticket: u64,
    target: TableSlot,
    rebuild: bool,
    ran: bool,
}

impl Task for CommitTask {
    fn name(&self) -> &'static str {
        "entity-commit"
    }

    fn run_background(&mut self) -> BackgroundOutcome {
        let mut turn = self.shared.gate.wait_turn(self.ticket);
        self.ran = true;

        let Some(tx) = self.transaction.as_mut() else {
            return Ok(());
        };
        if !self.shared.status().accepts_writes() {
            tx.mark_failed(WriteError::StoreUnusable);
            return Ok(());
        }
        let Some(conn) = turn.connection() else {
            tx.mark_failed(WriteError::StoreUnusable);
            return Ok(());
        };

        let table = self.shared.config.table_name(self.target);
        match tx.commit(conn, &table, self.rebuild, self.shared.config.max_payload_bytes) {
            Ok(()) => debug!(
                transaction_id = tx.id(),
                rows = tx.len(),
                table = %table,
                rebuild = self.rebuild,
                "transaction committed"
            ),
            Err(err) if err.is_fatal() => self.shared.poison(&err),
            Err(err) => warn!(
                transaction_id = tx.id(),
                rows = tx.len(),
                table = %table,
                error = %err,
                "transaction failed"
            ),
        }
        Ok(())
    }

    fn run_foreground(mut self: Box<Self>, outcome: BackgroundOutcome) {
        let Some(mut tx) = self.transaction.take() else {
            return;
        };
        if let Err(fault) = outcome {
            tx.mark_failed(WriteError::Fault {
                message: fault.to_string(),
            });
        }

        if self.rebuild {
            self.shared.rebuild_in_flight.store(false, Ordering::Release);
            if matches!(tx.state(), TransactionState::Committed) {
                if let Err(err) = self.shared.flip(self.target) {
                    tx.mark_failed(WriteError::from(&err));
                }
            } else {
                warn!(table = %self.target, "rebuild commit failed, live table unchanged");
            }
        }

        self.shared.finish(tx);
    }
}

impl Drop for CommitTask {
    fn drop(&mut self) {
        if !self.ran {
            self.shared.gate.abandon(self.ticket);
        }
        // Still holding the transaction means the foreground phase never ran.
        if let Some(mut tx) = self.transaction.take() {
            debug!(
                transaction_id = tx.id(),
                rows = tx.len(),
                "commit dropped before completion"
            );
            if self.rebuild {
                self.shared.rebuild_in_flight.store(false, Ordering::Release);
            }
            if self.rebuild || !matches!(tx.state(), TransactionState::Committed) {
                tx.mark_failed(WriteError::Discarded);
            }
            self.shared.finish(tx);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn only_open_states_accept_writes() {
        assert!(StoreStatus::Ready.accepts_writes());
        assert!(StoreStatus::RebuildRequired.accepts_writes());
        assert!(!StoreStatus::Uninitialized.accepts_writes());
        assert!(!StoreStatus::Unusable.accepts_writes());
        for status in [
            StoreStatus::Uninitialized,
            StoreStatus::RebuildRequired,
            StoreStatus::Ready,
            StoreStatus::Unusable,
        ] {
            assert_eq!(StoreStatus::from_u8(status.to_u8()), status);
        }
    }

    #[test]
    fn uninitialized_store_rejects_writes_and_commits() {
        let scheduler = Arc::new(TaskScheduler::new(
            tickstore_scheduler::SchedulerConfig::default(),
        ));
        let store = EntityStore::new(StoreConfig::default(), Arc::clone(&scheduler)).unwrap();

        let (completion, mut rx) = Completion::channel();
        store.write(RecordId(1), RecordTypeId(1), Utc::now(), vec![1], completion);
        assert_eq!(rx.try_recv().unwrap(), Err(WriteError::StoreUnusable));
        assert!(matches!(store.commit(), Err(StoreError::Unusable)));
        assert_eq!(store.stats().rows_failed, 1);
        assert_eq!(scheduler.stats().submitted, 0);
    }
}

//! Batches of rows committed as one atomic unit.
//!
//! ```text
//! Pending --freeze--> Committing --commit ok--> Committed
//!                          |
//!                          +--commit err / fault--> Failed
//! ```
//!
//! Rows can only be appended while `Pending`. Whatever the final state,
//! [`Transaction::notify_completions`] gives every row the same result, so a
//! batch never partially succeeds.

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::error::{StoreError, WriteError};
use crate::row::Row;

/// Commit state of a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting rows.
    Pending,
    /// Handed off for commit; frozen.
    Committing,
    /// Every row is durably present in the target table.
    Committed,
    /// Nothing was written.
    Failed(WriteError),
}

/// An ordered batch of rows.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    rows: Vec<Row>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) const fn new(id: u64) -> Self {
        Self {
            id,
            rows: Vec::new(),
            state: TransactionState::Pending,
        }
    }

    /// Identifier assigned by the pool when the transaction was created.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Current commit state.
    pub const fn state(&self) -> &TransactionState {
        &self.state
    }

    /// Append a row.
    ///
    /// # Errors
    ///
    /// Hands the row back unchanged if the transaction is no longer pending.
    #[allow(clippy::result_large_err)]
    pub fn append(&mut self, row: Row) -> Result<(), Row> {
        if self.state != TransactionState::Pending {
            return Err(row);
        }
        self.rows.push(row);
        Ok(())
    }

    /// Stop accepting rows.
    pub(crate) fn freeze(&mut self) {
        self.state = TransactionState::Committing;
    }

    /// Write every row to `table` inside one SQL transaction.
    ///
    /// With `replace_all` the table is emptied first, in the same SQL
    /// transaction, so the batch becomes the table's entire contents. On any
    /// error the SQL transaction rolls back and the state becomes `Failed`.
    pub fn commit(
        &mut self,
        conn: &mut Connection,
        table: &str,
        replace_all: bool,
        max_payload_bytes: usize,
    ) -> Result<(), StoreError> {
        let result = conn
            .transaction()
            .map_err(StoreError::from)
            .and_then(|sql| self.write_rows(sql, table, replace_all, max_payload_bytes));

        self.state = match &result {
            Ok(()) => TransactionState::Committed,
            Err(err) => TransactionState::Failed(WriteError::from(err)),
        };
        result
    }

    fn write_rows(
        &self,
        sql: SqlTransaction<'_>,
        table: &str,
        replace_all: bool,
        max_payload_bytes: usize,
    ) -> Result<(), StoreError> {
        if replace_all {
            sql.execute(&format!("DELETE FROM {table}"), [])?;
        }
        {
            let mut stmt = sql.prepare_cached(&format!(
                "INSERT OR REPLACE INTO {table} (record_type_id, record_id, timestamp_ms, payload)
                 VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for row in &self.rows {
                row.write_to_db(&mut stmt, max_payload_bytes)?;
            }
        }
        sql.commit()?;
        Ok(())
    }

    /// Fail the whole batch without touching the database.
    pub(crate) fn mark_failed(&mut self, error: WriteError) {
        self.state = TransactionState::Failed(error);
    }

    /// Report the batch outcome to every row, emptying the batch.
    ///
    /// A transaction that never reached a final state reports a fault.
    pub fn notify_completions(&mut self) {
        let result = match &self.state {
            TransactionState::Committed => Ok(()),
            TransactionState::Failed(err) => Err(err.clone()),
            TransactionState::Pending | TransactionState::Committing => Err(WriteError::Fault {
                message: String::from("transaction finished without a commit outcome"),
            }),
        };
        for row in self.rows.drain(..) {
            row.on_write_to_db_complete(result.clone());
        }
    }

    /// Return to an empty pending batch. Rows still held report
    /// [`WriteError::Discarded`].
    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        self.state = TransactionState::Pending;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::completion::{Completion, CompletionReceiver};
    use crate::record::{RecordId, RecordTypeId};

    const TABLE: &str = "snap";

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE snap (record_type_id INTEGER, record_id INTEGER, timestamp_ms INTEGER,
             payload BLOB, PRIMARY KEY (record_type_id, record_id));",
        )
        .unwrap();
        conn
    }

    fn row(id: i64, payload: Vec<u8>) -> (Row, CompletionReceiver) {
        let (completion, receiver) = Completion::channel();
        (
            Row::new(RecordId(id), RecordTypeId(1), Utc::now(), payload, completion),
            receiver,
        )
    }

    fn rows_in(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM snap", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn append_rejected_once_frozen() {
        let mut tx = Transaction::new(1);
        let (first, _rx1) = row(1, vec![1]);
        tx.append(first).unwrap();
        tx.freeze();

        let (second, _rx2) = row(2, vec![2]);
        let returned = tx.append(second).unwrap_err();
        assert_eq!(returned.record_id(), RecordId(2));
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn successful_commit_notifies_every_row() {
        let mut conn = connection();
        let mut tx = Transaction::new(1);
        let mut receivers = Vec::new();
        for id in [42, 43, 44] {
            let (r, rx) = row(id, vec![0xAB]);
            tx.append(r).unwrap();
            receivers.push(rx);
        }
        tx.freeze();

        tx.commit(&mut conn, TABLE, false, 1024).unwrap();
        assert_eq!(tx.state(), &TransactionState::Committed);
        tx.notify_completions();

        assert!(tx.is_empty());
        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), Ok(()));
        }
        assert_eq!(rows_in(&conn), 3);
    }

    #[test]
    fn one_bad_row_fails_the_whole_batch() {
        let mut conn = connection();
        let mut tx = Transaction::new(1);
        let mut receivers = Vec::new();
        for (id, size) in [(1, 4), (2, 64), (3, 4)] {
            let (r, rx) = row(id, vec![0; size]);
            tx.append(r).unwrap();
            receivers.push(rx);
        }
        tx.freeze();

        assert!(tx.commit(&mut conn, TABLE, false, 16).is_err());
        tx.notify_completions();

        for mut rx in receivers {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(WriteError::PayloadTooLarge { .. })
            ));
        }
        assert_eq!(rows_in(&conn), 0);
    }

    #[test]
    fn replace_all_leaves_only_the_batch() {
        let mut conn = connection();
        conn.execute("INSERT INTO snap VALUES (1, 99, 0, x'00')", [])
            .unwrap();

        let mut tx = Transaction::new(1);
        let (r, _rx) = row(5, vec![1]);
        tx.append(r).unwrap();
        tx.freeze();
        tx.commit(&mut conn, TABLE, true, 16).unwrap();

        let ids: Vec<i64> = conn
            .prepare("SELECT record_id FROM snap")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(ids, [5]);
    }

    #[test]
    fn unfinished_transaction_reports_fault() {
        let mut tx = Transaction::new(1);
        let (r, mut rx) = row(1, Vec::new());
        tx.append(r).unwrap();
        tx.freeze();
        tx.notify_completions();
        assert!(matches!(rx.try_recv().unwrap(), Err(WriteError::Fault { .. })));
    }

    #[test]
    fn clear_discards_held_rows() {
        let mut tx = Transaction::new(1);
        let (r, mut rx) = row(1, Vec::new());
        tx.append(r).unwrap();
        tx.mark_failed(WriteError::StoreUnusable);
        tx.clear();

        assert_eq!(rx.try_recv().unwrap(), Err(WriteError::Discarded));
        assert_eq!(tx.state(), &TransactionState::Pending);
    }
}

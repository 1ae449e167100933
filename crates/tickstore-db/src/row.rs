//! A single serialized record queued for persistence.

use chrono::{DateTime, Utc};
use rusqlite::{Statement, params};

use crate::completion::{Completion, WriteResult};
use crate::error::{StoreError, WriteError};
use crate::record::{RecordId, RecordTypeId};

/// One record snapshot plus the handle that reports its fate.
///
/// Immutable once built. The owning [`Transaction`](crate::Transaction)
/// hands the completion back out when the batch finishes.
pub struct Row {
    record_id: RecordId,
    record_type_id: RecordTypeId,
    timestamp: DateTime<Utc>,
    payload: Vec<u8>,
    rejection: Option<WriteError>,
    completion: Completion,
}

impl Row {
    /// Build a row from an already serialized payload.
    pub const fn new(
        record_id: RecordId,
        record_type_id: RecordTypeId,
        timestamp: DateTime<Utc>,
        payload: Vec<u8>,
        completion: Completion,
    ) -> Self {
        Self {
            record_id,
            record_type_id,
            timestamp,
            payload,
            rejection: None,
            completion,
        }
    }

    /// A row whose value could not be serialized. It fails the batch it
    /// joins when that batch is written.
    pub(crate) const fn rejected(
        record_id: RecordId,
        record_type_id: RecordTypeId,
        timestamp: DateTime<Utc>,
        error: WriteError,
        completion: Completion,
    ) -> Self {
        Self {
            record_id,
            record_type_id,
            timestamp,
            payload: Vec::new(),
            rejection: Some(error),
            completion,
        }
    }

    /// Entity identifier.
    pub const fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Kind of entity.
    pub const fn record_type_id(&self) -> RecordTypeId {
        self.record_type_id
    }

    /// Snapshot time.
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialized snapshot.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bind this row to an `INSERT OR REPLACE` statement and execute it.
    pub(crate) fn write_to_db(
        &self,
        stmt: &mut Statement<'_>,
        max_payload_bytes: usize,
    ) -> Result<(), StoreError> {
        if let Some(rejection) = &self.rejection {
            return Err(StoreError::RowRejected {
                source: rejection.clone(),
            });
        }
        if self.payload.len() > max_payload_bytes {
            return Err(StoreError::RowRejected {
                source: WriteError::PayloadTooLarge {
                    record_id: self.record_id,
                    size: self.payload.len(),
                    limit: max_payload_bytes,
                },
            });
        }

        stmt.execute(params![
            i64::from(self.record_type_id.into_inner()),
            self.record_id.into_inner(),
            self.timestamp.timestamp_millis(),
            self.payload,
        ])?;
        Ok(())
    }

    /// Forward the batch outcome to this row's completion handle.
    pub(crate) fn on_write_to_db_complete(self, result: WriteResult) {
        self.completion.complete(result);
    }
}

impl core::fmt::Debug for Row {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Row")
            .field("record_id", &self.record_id)
            .field("record_type_id", &self.record_type_id)
            .field("timestamp", &self.timestamp)
            .field("payload_len", &self.payload.len())
            .field("rejection", &self.rejection)
            .field("completion", &self.completion)
            .finish()
    }
}

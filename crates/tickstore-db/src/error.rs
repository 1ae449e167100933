//! Error types for the persistence engine.
//!
//! [`StoreError`] is returned by store lifecycle calls (`init`, `reset`,
//! `commit`, reads). [`WriteError`] is what a row's
//! [`Completion`](crate::Completion) receives; `write` itself never fails.

use rusqlite::ErrorCode;

use crate::record::{RecordId, SchemaChecksum};

/// Errors that can occur in the persistence engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An `SQLite` operation failed.
    #[error("SQLite error: {source}")]
    Sqlite {
        /// The underlying database error.
        #[from]
        source: rusqlite::Error,
    },

    /// A filesystem operation failed.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The on-disk schema checksum differs from the expected one.
    #[error("schema checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        /// Checksum the caller expects.
        expected: SchemaChecksum,
        /// Checksum found in the marker table.
        found: SchemaChecksum,
    },

    /// Stored data could not be interpreted.
    #[error("corrupt store: {message}")]
    Corrupt {
        /// What was found to be corrupt.
        message: String,
    },

    /// A row could not be written, failing its whole transaction.
    #[error("row rejected: {source}")]
    RowRejected {
        /// Why the row was rejected.
        source: WriteError,
    },

    /// The store is not initialized or hit a fatal failure.
    #[error("store unusable")]
    Unusable,

    /// The operation needs all commits to have completed first.
    #[error("store busy: {in_flight} commits in flight")]
    Busy {
        /// Number of commits not yet completed on the owner thread.
        in_flight: usize,
    },

    /// The store configuration is invalid.
    #[error("invalid store config: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },
}

impl StoreError {
    /// Whether this error means the store can no longer be written safely.
    ///
    /// Fatal errors are connection-level: a full disk, a corrupt or foreign
    /// file, lost permissions or an I/O failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Sqlite { source } => matches!(
                source.sqlite_error_code(),
                Some(
                    ErrorCode::DiskFull
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::NotADatabase
                        | ErrorCode::CannotOpen
                        | ErrorCode::ReadOnly
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::PermissionDenied
                )
            ),
            Self::Io { .. } | Self::Corrupt { .. } => true,
            Self::ChecksumMismatch { .. }
            | Self::RowRejected { .. }
            | Self::Unusable
            | Self::Busy { .. }
            | Self::Config { .. } => false,
        }
    }
}

/// Failure delivered to a row's completion handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The row's payload exceeds the configured limit.
    #[error("payload of record {record_id} is {size} bytes, limit is {limit}")]
    PayloadTooLarge {
        /// The offending record.
        record_id: RecordId,
        /// Payload size in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// The value could not be serialized into a payload.
    #[error("serialization failed: {message}")]
    Serialization {
        /// The serializer's message.
        message: String,
    },

    /// The database rejected the transaction.
    #[error("database error: {message}")]
    Database {
        /// The database's message.
        message: String,
    },

    /// The commit task faulted on its worker.
    #[error("commit task faulted: {message}")]
    Fault {
        /// Description of the fault.
        message: String,
    },

    /// The store is not initialized or hit a fatal failure.
    #[error("store unusable")]
    StoreUnusable,

    /// The row was dropped before being committed, e.g. at shutdown.
    #[error("write discarded before commit")]
    Discarded,
}

impl From<&StoreError> for WriteError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::RowRejected { source } => source.clone(),
            StoreError::Unusable => Self::StoreUnusable,
            other => Self::Database {
                message: other.to_string(),
            },
        }
    }
}

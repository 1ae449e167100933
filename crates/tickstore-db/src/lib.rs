//! Write-back persistence of entity snapshots for the tickstore engine.
//!
//! Producers call [`EntityStore::write`] from any thread. Rows accumulate in
//! a [`Transaction`]; once per tick the owner thread calls
//! [`EntityStore::commit`], which hands the batch to the shared
//! [`TaskScheduler`](tickstore_scheduler::TaskScheduler). A worker writes it
//! to `SQLite` in one SQL transaction, and the owner thread learns the result
//! on its next [`EntityStore::tick`], where each row's [`Completion`] fires.
//!
//! # Architecture
//!
//! ```text
//! EntityStore
//!     |-- TransactionPool   (reusable batches)
//!     |-- ConnectionGate    (one SQLite connection, commits in ticket order)
//!     +-- two data tables   ({prefix}_a / {prefix}_b, one live)
//!         +-- store_marker  (schema checksum + live table)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- [`EntityStore`], status and statistics
//! - [`transaction`] -- [`Transaction`] and its commit state
//! - [`row`] -- [`Row`]
//! - [`pool`] -- [`TransactionPool`]
//! - [`completion`] -- [`Completion`] handles
//! - [`schema`] -- Table layout, marker row and reads
//! - [`record`] -- Identifier newtypes and [`SchemaChecksum`]
//! - [`config`] -- [`StoreConfig`]
//! - [`error`] -- [`StoreError`] and [`WriteError`]

pub mod completion;
pub mod config;
pub mod error;
mod gate;
pub mod pool;
pub mod record;
pub mod row;
pub mod schema;
pub mod store;
pub mod transaction;

pub use completion::{Completion, CompletionReceiver, WriteResult};
pub use config::{StoreConfig, SyncMode};
pub use error::{StoreError, WriteError};
pub use pool::TransactionPool;
pub use record::{RecordId, RecordTypeId, SchemaChecksum};
pub use row::Row;
pub use schema::{Marker, StoredRecord, TableSlot};
pub use store::{CommitOutcome, EntityStore, StoreStats, StoreStatus};
pub use transaction::{Transaction, TransactionState};

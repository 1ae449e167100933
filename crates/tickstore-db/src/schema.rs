//! Physical layout of a store file and the statements that touch it.
//!
//! A store file holds two data tables with identical columns, `{prefix}_a`
//! and `{prefix}_b`, and a single-row `store_marker` table naming the
//! schema checksum and the live table. Table names come from a validated
//! [`StoreConfig`], so formatting them into SQL is safe.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::record::{RecordId, RecordTypeId, SchemaChecksum};

/// Name of the marker table.
const MARKER_TABLE: &str = "store_marker";

// =============================================================================
// Table slots
// =============================================================================

/// One of the two physical data tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableSlot {
    /// The `{prefix}_a` table.
    A,
    /// The `{prefix}_b` table.
    B,
}

impl TableSlot {
    /// The slot that is not `self`.
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Suffix of the physical table name, also stored in the marker.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::A,
            _ => Self::B,
        }
    }
}

impl core::fmt::Display for TableSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.suffix())
    }
}

// =============================================================================
// Row types
// =============================================================================

/// Contents of the marker row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    /// Schema checksum the file was written with.
    pub checksum: SchemaChecksum,
    /// The table holding the current snapshot.
    pub live: TableSlot,
    /// When the marker was last written.
    pub updated_at: DateTime<Utc>,
}

/// A record as read back from a data table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Kind of entity.
    pub record_type_id: RecordTypeId,
    /// Entity identifier.
    pub record_id: RecordId,
    /// Timestamp the snapshot was taken at, millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Serialized snapshot.
    pub payload: Vec<u8>,
}

// =============================================================================
// Connection
// =============================================================================

/// Open (creating if needed) the store file and apply connection pragmas.
pub(crate) fn open_connection(config: &StoreConfig) -> Result<Connection, StoreError> {
    std::fs::create_dir_all(&config.directory)?;
    let path = config.path();
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&path, flags)?;

    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch(&format!(
        "PRAGMA synchronous = {};",
        config.synchronous.pragma_value()
    ))?;

    info!(path = %path.display(), "store connection opened");
    Ok(conn)
}

/// Delete the store file and its WAL sidecars.
pub(crate) fn remove_store_files(config: &StoreConfig) -> Result<(), StoreError> {
    let path = config.path();
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.clone().into_os_string();
        name.push(suffix);
        match std::fs::remove_file(&name) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    warn!(path = %path.display(), "store files removed");
    Ok(())
}

// =============================================================================
// DDL
// =============================================================================

/// Create both data tables and the marker table if absent.
pub(crate) fn ensure_schema(conn: &Connection, config: &StoreConfig) -> Result<(), StoreError> {
    for slot in [TableSlot::A, TableSlot::B] {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                record_type_id INTEGER NOT NULL,
                record_id INTEGER NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                payload BLOB NOT NULL,
                PRIMARY KEY (record_type_id, record_id)
            );",
            config.table_name(slot)
        ))?;
    }
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {MARKER_TABLE} (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            checksum INTEGER NOT NULL,
            live_table TEXT NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );"
    ))?;
    Ok(())
}

/// Drop both data tables and the marker table.
pub(crate) fn drop_all(conn: &Connection, config: &StoreConfig) -> Result<(), StoreError> {
    for slot in [TableSlot::A, TableSlot::B] {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", config.table_name(slot)))?;
    }
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {MARKER_TABLE};"))?;
    Ok(())
}

/// Delete every row of `table`.
pub(crate) fn clear_table(conn: &Connection, table: &str) -> Result<(), StoreError> {
    conn.execute(&format!("DELETE FROM {table}"), [])?;
    Ok(())
}

// =============================================================================
// Marker
// =============================================================================

/// Read the marker row, if present.
pub(crate) fn read_marker(conn: &Connection) -> Result<Option<Marker>, StoreError> {
    let raw: Option<(i64, String, i64)> = conn
        .query_row(
            &format!("SELECT checksum, live_table, updated_at_ms FROM {MARKER_TABLE} WHERE id = 0"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((checksum, live_table, updated_at_ms)) = raw else {
        return Ok(None);
    };

    let checksum = u32::try_from(checksum).map_err(|err| StoreError::Corrupt {
        message: format!("marker checksum {checksum}: {err}"),
    })?;
    let live = TableSlot::from_suffix(&live_table).ok_or_else(|| StoreError::Corrupt {
        message: format!("marker names unknown live table {live_table:?}"),
    })?;
    let updated_at = millis_to_datetime(updated_at_ms)?;

    Ok(Some(Marker {
        checksum: SchemaChecksum(checksum),
        live,
        updated_at,
    }))
}

/// Write the marker row, replacing any existing one.
pub(crate) fn write_marker(
    conn: &Connection,
    checksum: SchemaChecksum,
    live: TableSlot,
) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {MARKER_TABLE} (id, checksum, live_table, updated_at_ms)
             VALUES (0, ?1, ?2, ?3)"
        ),
        params![
            i64::from(checksum.into_inner()),
            live.suffix(),
            Utc::now().timestamp_millis()
        ],
    )?;
    Ok(())
}

/// Point the marker at `live`. Fails if the marker row is missing.
pub(crate) fn set_live(conn: &Connection, live: TableSlot) -> Result<(), StoreError> {
    let changed = conn.execute(
        &format!("UPDATE {MARKER_TABLE} SET live_table = ?1, updated_at_ms = ?2 WHERE id = 0"),
        params![live.suffix(), Utc::now().timestamp_millis()],
    )?;
    if changed == 0 {
        return Err(StoreError::Corrupt {
            message: String::from("marker row disappeared"),
        });
    }
    Ok(())
}

// =============================================================================
// Reads
// =============================================================================

/// Read one record from `table`.
pub(crate) fn read_record(
    conn: &Connection,
    table: &str,
    record_type_id: RecordTypeId,
    record_id: RecordId,
) -> Result<Option<StoredRecord>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT record_type_id, record_id, timestamp_ms, payload FROM {table}
         WHERE record_type_id = ?1 AND record_id = ?2"
    ))?;
    let raw = stmt
        .query_row(
            params![i64::from(record_type_id.into_inner()), record_id.into_inner()],
            map_raw_record,
        )
        .optional()?;
    raw.map(RawRecord::into_stored).transpose()
}

/// Read every record of `table`, ordered by type then id.
pub(crate) fn read_all(conn: &Connection, table: &str) -> Result<Vec<StoredRecord>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT record_type_id, record_id, timestamp_ms, payload FROM {table}
         ORDER BY record_type_id, record_id"
    ))?;
    let rows = stmt.query_map([], map_raw_record)?;
    let mut records = Vec::new();
    for raw in rows {
        records.push(raw?.into_stored()?);
    }
    Ok(records)
}

/// Number of rows in `table`.
pub(crate) fn count(conn: &Connection, table: &str) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    u64::try_from(count).map_err(|err| StoreError::Corrupt {
        message: format!("row count {count} for {table}: {err}"),
    })
}

struct RawRecord {
    record_type_id: i64,
    record_id: i64,
    timestamp_ms: i64,
    payload: Vec<u8>,
}

impl RawRecord {
    fn into_stored(self) -> Result<StoredRecord, StoreError> {
        let record_type_id =
            u32::try_from(self.record_type_id).map_err(|err| StoreError::Corrupt {
                message: format!("record type id {}: {err}", self.record_type_id),
            })?;
        Ok(StoredRecord {
            record_type_id: RecordTypeId(record_type_id),
            record_id: RecordId(self.record_id),
            timestamp: millis_to_datetime(self.timestamp_ms)?,
            payload: self.payload,
        })
    }
}

fn map_raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        record_type_id: row.get(0)?,
        record_id: row.get(1)?,
        timestamp_ms: row.get(2)?,
        payload: row.get(3)?,
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        message: format!("timestamp {millis} out of range"),
    })
}

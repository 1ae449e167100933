//! Store configuration.
//!
//! Supplied once at construction as plain data. The structs derive
//! [`Deserialize`] with per-field defaults so a host can embed them in its
//! own configuration file; nothing here reads files or the environment.

use std::path::PathBuf;

use serde::Deserialize;
use tickstore_scheduler::Priority;

use crate::error::StoreError;
use crate::schema::TableSlot;

/// Default maximum payload size (16 MiB).
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// `SQLite` `synchronous` pragma setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// No fsync; fastest, loses data on power failure.
    Off,
    /// fsync at critical moments (safe with WAL).
    #[default]
    Normal,
    /// fsync on every commit.
    Full,
}

impl SyncMode {
    pub(crate) const fn pragma_value(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Configuration for an [`EntityStore`](crate::EntityStore).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the store file. Created on `init` if missing.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Logical database name; the file is `{directory}/{name}.db`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Prefix of the two physical tables, `{prefix}_a` and `{prefix}_b`.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Largest payload a single row may carry.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// How long `SQLite` waits on a locked database file.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Durability of commits.
    #[serde(default)]
    pub synchronous: SyncMode,

    /// Scheduler priority of commit tasks.
    #[serde(default)]
    pub commit_priority: Priority,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            name: default_name(),
            table_prefix: default_table_prefix(),
            max_payload_bytes: default_max_payload_bytes(),
            busy_timeout_ms: default_busy_timeout_ms(),
            synchronous: SyncMode::default(),
            commit_priority: Priority::default(),
        }
    }
}

impl StoreConfig {
    /// Create a configuration for the logical database `name` under
    /// `directory`, with defaults for everything else.
    pub fn new(directory: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            directory: directory.into(),
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Set the maximum payload size.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Set the table prefix.
    #[must_use]
    pub fn with_table_prefix(mut self, prefix: &str) -> Self {
        prefix.clone_into(&mut self.table_prefix);
        self
    }

    /// Set the `synchronous` mode.
    #[must_use]
    pub const fn with_synchronous(mut self, mode: SyncMode) -> Self {
        self.synchronous = mode;
        self
    }

    /// Path of the store file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(format!("{}.db", self.name))
    }

    /// Name of the physical table behind `slot`.
    pub fn table_name(&self, slot: TableSlot) -> String {
        format!("{}_{}", self.table_prefix, slot.suffix())
    }

    /// Check the configuration for values the store cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the name is empty or contains a
    /// path separator, if the table prefix is not a plain SQL identifier,
    /// or if the payload limit is zero.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(config_error("name must not be empty"));
        }
        if self.name.contains(['/', '\\']) || self.name == ".." || self.name == "." {
            return Err(config_error("name must not contain path components"));
        }
        if !is_identifier(&self.table_prefix) {
            return Err(config_error(
                "table_prefix must start with a letter or '_' and contain only ASCII letters, digits and '_'",
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(config_error("max_payload_bytes must be at least 1"));
        }
        Ok(())
    }
}

fn is_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn config_error(message: &str) -> StoreError {
    StoreError::Config {
        message: message.to_owned(),
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_name() -> String {
    String::from("entities")
}

fn default_table_prefix() -> String {
    String::from("entities")
}

const fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

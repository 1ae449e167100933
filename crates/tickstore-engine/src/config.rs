//! Engine configuration, loaded from `tickstore.yaml` when present.

use std::path::Path;

use serde::Deserialize;
use tickstore_db::StoreConfig;
use tickstore_scheduler::SchedulerConfig;
use tracing::info;

use crate::error::EngineError;

/// Default config file, relative to the working directory.
const CONFIG_FILE: &str = "tickstore.yaml";

/// Everything the demo loop needs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Store location and limits.
    #[serde(default)]
    pub store: StoreConfig,

    /// Description hashed into the store's schema checksum. Changing it
    /// forces a reset and full rebuild.
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Number of ticks to run before shutting down.
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    /// Wall-clock pause between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Entities in a freshly seeded world.
    #[serde(default = "default_entity_count")]
    pub entity_count: u32,

    /// Run a full rebuild every this many ticks. Zero disables periodic
    /// rebuilds.
    #[serde(default = "default_rebuild_every")]
    pub rebuild_every: u64,

    /// Seed for the world's random walk.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            schema: default_schema(),
            ticks: default_ticks(),
            tick_interval_ms: default_tick_interval_ms(),
            entity_count: default_entity_count(),
            rebuild_every: default_rebuild_every(),
            seed: default_seed(),
        }
    }
}

/// Load the configuration from `tickstore.yaml`, or use defaults if the
/// file does not exist.
pub fn load() -> Result<EngineConfig, EngineError> {
    let path = Path::new(CONFIG_FILE);
    if !path.exists() {
        info!("config file not found, using defaults");
        return Ok(EngineConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
        message: format!("failed to read {CONFIG_FILE}: {e}"),
    })?;
    parse(&contents)
}

fn parse(contents: &str) -> Result<EngineConfig, EngineError> {
    serde_yml::from_str(contents).map_err(|e| EngineError::Config {
        message: format!("failed to parse {CONFIG_FILE}: {e}"),
    })
}

fn default_schema() -> String {
    String::from("entity:v1 id kind x y hp")
}

const fn default_ticks() -> u64 {
    200
}

const fn default_tick_interval_ms() -> u64 {
    10
}

const fn default_entity_count() -> u32 {
    64
}

const fn default_rebuild_every() -> u64 {
    50
}

const fn default_seed() -> u64 {
    7
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = parse(
            "ticks: 5\nscheduler:\n  worker_count: 3\nstore:\n  directory: /tmp/sim\n  name: demo\n",
        )
        .unwrap();
        assert_eq!(config.ticks, 5);
        assert_eq!(config.scheduler.worker_count, 3);
        assert_eq!(config.store.name, "demo");
        assert_eq!(config.store.table_prefix, "entities");
        assert_eq!(config.rebuild_every, default_rebuild_every());
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        assert!(matches!(
            parse("ticks: [not a number"),
            Err(EngineError::Config { .. })
        ));
    }
}

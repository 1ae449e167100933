//! Tickstore engine: a fixed-rate server loop persisting a small world.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `tickstore.yaml`
//! 3. Start the shared task scheduler
//! 4. Open the entity store, resetting it if it cannot be used
//! 5. Restore the world from the live table, or seed a fresh one
//! 6. Run the tick loop
//! 7. Drain the scheduler and close the store

mod config;
mod error;
mod world;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tickstore_db::{CommitOutcome, Completion, EntityStore, SchemaChecksum, StoreStatus};
use tickstore_scheduler::{Priority, TaskScheduler};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::world::{Entity, World};

/// Counts write outcomes reported through completion callbacks.
#[derive(Debug, Default)]
struct WriteTally {
    written: AtomicU64,
    failed: AtomicU64,
}

impl WriteTally {
    fn completion(self: &Arc<Self>) -> Completion {
        let tally = Arc::clone(self);
        Completion::callback(move |result| {
            let counter = if result.is_ok() {
                &tally.written
            } else {
                &tally.failed
            };
            counter.fetch_add(1, Ordering::Relaxed);
        })
    }
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the scheduler or the store fail to
/// start.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("tickstore-engine starting");

    // 2. Load configuration.
    let config = config::load()?;
    info!(
        ticks = config.ticks,
        tick_interval_ms = config.tick_interval_ms,
        rebuild_every = config.rebuild_every,
        store = %config.store.path().display(),
        "Configuration loaded"
    );

    // 3. Start the scheduler.
    let scheduler = TaskScheduler::start(config.scheduler.clone()).map_err(EngineError::from)?;

    // 4. Open the store.
    let store = EntityStore::new(config.store.clone(), Arc::clone(&scheduler))
        .map_err(EngineError::from)?;
    let checksum = SchemaChecksum::of(&config.schema);
    if let Err(err) = store.try_init(checksum) {
        warn!(error = %err, "store unusable, resetting for a full rebuild");
        store.reset(checksum).map_err(EngineError::from)?;
    }
    info!(status = ?store.status(), live = %store.live_table(), "Entity store opened");

    // 5. Restore or seed the world.
    let mut world = restore_or_seed(&store, &config)?;
    info!(entities = world.entities().len(), "World ready");
    submit_digest(&scheduler, world.entities());

    // 6. Run the loop.
    let tally = Arc::new(WriteTally::default());
    run(&store, &mut world, &config, &tally);

    // 7. Shut down.
    let report = scheduler.shutdown(false, true);
    store.close().map_err(EngineError::from)?;

    let stats = store.stats();
    info!(
        rows_written = stats.rows_written,
        rows_failed = stats.rows_failed,
        commits = stats.commits,
        failed_commits = stats.failed_commits,
        flips = stats.flips,
        pool_created = stats.pool_created,
        callbacks_ok = tally.written.load(Ordering::Relaxed),
        callbacks_failed = tally.failed.load(Ordering::Relaxed),
        drained = report.foreground_runs,
        ran_inline = report.ran_inline,
        "tickstore-engine stopped"
    );
    Ok(())
}

/// Load entities from the live table if the store holds a valid snapshot.
fn restore_or_seed(store: &EntityStore, config: &EngineConfig) -> Result<World, EngineError> {
    if store.status() == StoreStatus::Ready {
        let records = store.live_records()?;
        let world = World::restore(&records, config.seed);
        if !world.is_empty() {
            info!(records = records.len(), "World restored from live table");
            return Ok(world);
        }
    }
    Ok(World::seed(config.entity_count, config.seed))
}

/// Background work unrelated to persistence, sharing the same pool.
fn submit_digest(scheduler: &TaskScheduler, entities: &[Entity]) {
    let entities = entities.to_vec();
    let total = Arc::new(AtomicU64::new(0));
    let computed = Arc::clone(&total);
    scheduler.submit_fn(
        Priority::Low,
        move || {
            let hp: u64 = entities.iter().map(|e| u64::from(e.hp)).sum();
            computed.store(hp, Ordering::Relaxed);
            Ok(())
        },
        move |outcome| match outcome {
            Ok(()) => info!(total_hp = total.load(Ordering::Relaxed), "World digest computed"),
            Err(fault) => warn!(%fault, "World digest failed"),
        },
    );
}

/// Decides on which ticks the loop writes the whole world as a rebuild.
#[derive(Debug)]
struct RebuildSchedule {
    every: u64,
    pending: bool,
}

impl RebuildSchedule {
    const fn new(every: u64) -> Self {
        Self {
            every,
            pending: false,
        }
    }

    /// Whether `tick` should write a full snapshot. A periodic rebuild that
    /// falls due while another is in flight waits for it to finish, so the
    /// snapshot is written exactly once, on the tick whose commit carries it.
    const fn full_snapshot(&mut self, tick: u64, required: bool, in_flight: bool) -> bool {
        if matches!(tick.checked_rem(self.every), Some(0)) {
            self.pending = true;
        }
        if in_flight {
            return false;
        }
        let full = self.pending || required;
        self.pending = false;
        full
    }
}

/// The fixed-rate loop: simulate, write, commit, tick.
fn run(store: &EntityStore, world: &mut World, config: &EngineConfig, tally: &Arc<WriteTally>) {
    let interval = Duration::from_millis(config.tick_interval_ms);
    let mut schedule = RebuildSchedule::new(config.rebuild_every);

    for tick in 1..=config.ticks {
        let changed = world.step();
        let now = Utc::now();

        let full = schedule.full_snapshot(tick, store.needs_rebuild(), store.rebuild_in_flight());
        let entities = if full {
            store.begin_rebuild();
            world.entities()
        } else {
            changed.as_slice()
        };
        for entity in entities {
            write_entity(store, entity, now, tally);
        }

        match store.commit() {
            Ok(CommitOutcome::Submitted {
                rows,
                table,
                rebuild,
            }) => debug!(tick, rows, table = %table, rebuild, "Commit submitted"),
            Ok(CommitOutcome::Deferred) => debug!(tick, "Commit deferred behind rebuild"),
            Ok(CommitOutcome::Empty) => {}
            Err(err) => {
                error!(tick, error = %err, "Store unusable, stopping loop");
                break;
            }
        }

        store.tick();
        thread::sleep(interval);
    }
}

fn write_entity(
    store: &EntityStore,
    entity: &Entity,
    now: chrono::DateTime<Utc>,
    tally: &Arc<WriteTally>,
) {
    store.write_json(
        entity.record_id(),
        entity.kind.record_type(),
        now,
        entity,
        tally.completion(),
    );
}

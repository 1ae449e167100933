//! End-to-end tests of the entity store against a real `SQLite` file.
//!
//! Every test owns a temporary directory and drives the store from the test
//! thread, which is the scheduler's owner thread.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::items_after_statements,
    clippy::missing_panics_doc
)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tempfile::TempDir;
use tickstore_db::{
    CommitOutcome, Completion, CompletionReceiver, EntityStore, RecordId, RecordTypeId,
    SchemaChecksum, StoreConfig, StoreError, StoreStatus, TableSlot, WriteError,
};
use tickstore_scheduler::{SchedulerConfig, TaskScheduler};

// =============================================================================
// Helpers
// =============================================================================

const ENTITY: RecordTypeId = RecordTypeId(1);

fn checksum() -> SchemaChecksum {
    SchemaChecksum::of("entity:v1")
}

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig::new(dir.path().join("stores"), "world")
}

fn open(config: StoreConfig, workers: usize) -> EntityStore {
    let scheduler =
        TaskScheduler::start(SchedulerConfig::default().with_worker_count(workers)).unwrap();
    EntityStore::new(config, scheduler).unwrap()
}

/// Tick until every handed-off commit has completed on this thread.
fn pump(store: &EntityStore) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.in_flight() > 0 {
        assert!(Instant::now() < deadline, "commits did not complete");
        store.tick();
        thread::sleep(Duration::from_millis(1));
    }
}

fn write_ids(store: &EntityStore, ids: &[i64], payload_len: usize) -> Vec<CompletionReceiver> {
    ids.iter()
        .map(|&id| {
            let (completion, receiver) = Completion::channel();
            store.write(
                RecordId(id),
                ENTITY,
                Utc::now(),
                vec![0x5A; payload_len],
                completion,
            );
            receiver
        })
        .collect()
}

fn results(receivers: Vec<CompletionReceiver>) -> Vec<Result<(), WriteError>> {
    receivers
        .into_iter()
        .map(|mut rx| rx.try_recv().expect("completion did not fire"))
        .collect()
}

fn live_ids(store: &EntityStore) -> Vec<i64> {
    store
        .live_records()
        .unwrap()
        .into_iter()
        .map(|record| record.record_id.into_inner())
        .collect()
}

/// Run `sql` against the store file from a second connection.
fn tamper(config: &StoreConfig, sql: &str) {
    let conn = Connection::open(config.path()).unwrap();
    conn.execute_batch(sql).unwrap();
}

/// Open a fresh store and complete its initial (empty) rebuild.
fn ready_store(dir: &TempDir) -> EntityStore {
    let store = open(config(dir), 2);
    assert!(store.init(checksum()));
    store.commit().unwrap();
    pump(&store);
    assert_eq!(store.status(), StoreStatus::Ready);
    store
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn fresh_store_requires_rebuild_before_ready() {
    let dir = TempDir::new().unwrap();
    let store = open(config(&dir), 2);

    assert!(store.init(checksum()));
    assert_eq!(store.status(), StoreStatus::RebuildRequired);
    assert_eq!(store.marker().unwrap().unwrap().live, TableSlot::A);

    let receivers = write_ids(&store, &[1, 2, 3], 16);
    let outcome = store.commit().unwrap();
    assert_eq!(
        outcome,
        CommitOutcome::Submitted {
            rows: 3,
            table: TableSlot::B,
            rebuild: true
        }
    );
    pump(&store);

    assert!(results(receivers).iter().all(Result::is_ok));
    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(store.live_table(), TableSlot::B);
    assert_eq!(live_ids(&store), [1, 2, 3]);
}

#[test]
fn reopen_restores_live_snapshot() {
    let dir = TempDir::new().unwrap();
    {
        let store = ready_store(&dir);
        let receivers = write_ids(&store, &[7, 8], 4);
        store.commit().unwrap();
        pump(&store);
        assert!(results(receivers).iter().all(Result::is_ok));
        store.scheduler().shutdown(false, true);
        store.close().unwrap();
    }

    let store = open(config(&dir), 1);
    assert!(store.init(checksum()));
    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(store.live_table(), TableSlot::B);
    assert_eq!(live_ids(&store), [7, 8]);

    let record = store.read_live(ENTITY, RecordId(8)).unwrap().unwrap();
    assert_eq!(record.payload, vec![0x5A; 4]);
    assert!(store.read_live(ENTITY, RecordId(9)).unwrap().is_none());
}

#[test]
fn checksum_mismatch_fails_closed_until_fresh_init() {
    let dir = TempDir::new().unwrap();
    {
        let store = ready_store(&dir);
        store.scheduler().shutdown(false, true);
        store.close().unwrap();
    }

    let store = open(config(&dir), 1);
    let other = SchemaChecksum::of("entity:v2");
    assert!(!store.init(other));
    assert!(matches!(
        store.try_init(other),
        Err(StoreError::ChecksumMismatch { .. })
    ));
    assert_eq!(store.status(), StoreStatus::Unusable);

    let receivers = write_ids(&store, &[1], 4);
    assert_eq!(results(receivers), [Err(WriteError::StoreUnusable)]);
    assert!(matches!(store.commit(), Err(StoreError::Unusable)));
    assert!(matches!(store.live_records(), Err(StoreError::Unusable)));

    // The original checksum still opens the untouched store.
    assert!(store.init(checksum()));
    assert_eq!(store.status(), StoreStatus::Ready);
    let receivers = write_ids(&store, &[1], 4);
    store.commit().unwrap();
    pump(&store);
    assert_eq!(results(receivers), [Ok(())]);
}

#[test]
fn reset_after_mismatch_starts_a_rebuild() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    let receivers = write_ids(&store, &[1, 2], 4);
    store.commit().unwrap();
    pump(&store);
    assert!(results(receivers).iter().all(Result::is_ok));

    let v2 = SchemaChecksum::of("entity:v2");
    assert!(!store.init(v2));
    store.reset(v2).unwrap();

    assert_eq!(store.status(), StoreStatus::RebuildRequired);
    let marker = store.marker().unwrap().unwrap();
    assert_eq!(marker.checksum, v2);
    assert_eq!(marker.live, TableSlot::A);
    assert_eq!(store.row_count(TableSlot::A).unwrap(), 0);
    assert_eq!(store.row_count(TableSlot::B).unwrap(), 0);
}

#[test]
fn garbage_file_fails_init_and_reset_recovers() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    std::fs::create_dir_all(&config.directory).unwrap();
    std::fs::write(config.path(), "this is not a database file\n".repeat(200)).unwrap();

    let store = open(config, 1);
    assert!(!store.init(checksum()));
    assert_eq!(store.status(), StoreStatus::Unusable);

    store.reset(checksum()).unwrap();
    assert_eq!(store.status(), StoreStatus::RebuildRequired);

    let receivers = write_ids(&store, &[5], 4);
    store.commit().unwrap();
    pump(&store);
    assert_eq!(results(receivers), [Ok(())]);
    assert_eq!(store.status(), StoreStatus::Ready);
}

#[test]
fn unreadable_marker_forces_a_rebuild() {
    let dir = TempDir::new().unwrap();
    {
        let store = ready_store(&dir);
        let receivers = write_ids(&store, &[1, 2], 4);
        store.commit().unwrap();
        pump(&store);
        assert!(results(receivers).iter().all(Result::is_ok));
        store.scheduler().shutdown(false, true);
        store.close().unwrap();
    }
    tamper(&config(&dir), "UPDATE store_marker SET live_table = 'z' WHERE id = 0;");

    let store = open(config(&dir), 1);
    assert_eq!(store.try_init(checksum()).unwrap(), StoreStatus::RebuildRequired);
    let marker = store.marker().unwrap().unwrap();
    assert_eq!(marker.live, TableSlot::A);
    assert_eq!(marker.checksum, checksum());
    assert_eq!(store.row_count(TableSlot::A).unwrap(), 0);
    assert_eq!(store.row_count(TableSlot::B).unwrap(), 0);

    let receivers = write_ids(&store, &[3], 4);
    store.commit().unwrap();
    pump(&store);
    assert_eq!(results(receivers), [Ok(())]);
    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(live_ids(&store), [3]);
}

#[test]
fn marker_lost_at_runtime_makes_store_unusable() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    let live = store.live_table();
    tamper(&config(&dir), "DELETE FROM store_marker;");

    store.begin_rebuild();
    let receivers = write_ids(&store, &[1, 2], 4);
    store.commit().unwrap();
    pump(&store);

    assert!(
        results(receivers)
            .iter()
            .all(|r| matches!(r, Err(WriteError::Database { .. })))
    );
    assert_eq!(store.status(), StoreStatus::Unusable);
    assert_eq!(store.live_table(), live);

    let receivers = write_ids(&store, &[3], 4);
    assert_eq!(results(receivers), [Err(WriteError::StoreUnusable)]);
    assert!(matches!(store.commit(), Err(StoreError::Unusable)));
}

#[test]
fn init_rejected_while_commits_in_flight() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    let _receivers = write_ids(&store, &[1], 4);
    store.commit().unwrap();

    assert!(matches!(
        store.try_init(checksum()),
        Err(StoreError::Busy { in_flight: 1 })
    ));
    pump(&store);
    assert!(store.init(checksum()));
}

// =============================================================================
// Double buffering
// =============================================================================

#[test]
fn write_through_then_rebuild_flips_live_table() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    let before = store.live_table();

    let receivers = write_ids(&store, &[42, 43, 44], 32);
    assert_eq!(
        store.commit().unwrap(),
        CommitOutcome::Submitted {
            rows: 3,
            table: before,
            rebuild: false
        }
    );
    pump(&store);
    assert_eq!(results(receivers), [Ok(()), Ok(()), Ok(())]);
    assert_eq!(live_ids(&store), [42, 43, 44]);

    store.begin_rebuild();
    let receivers = write_ids(&store, &[42, 43, 44], 32);
    assert_eq!(
        store.commit().unwrap(),
        CommitOutcome::Submitted {
            rows: 3,
            table: before.other(),
            rebuild: true
        }
    );
    pump(&store);
    assert!(results(receivers).iter().all(Result::is_ok));

    assert_eq!(store.live_table(), before.other());
    assert_eq!(store.marker().unwrap().unwrap().live, before.other());
    assert_eq!(store.row_count(before.other()).unwrap(), 3);
    assert_eq!(store.stats().flips, 2);
}

#[test]
fn rebuild_replaces_stale_rows_in_target_table() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);

    // Two rebuilds bring the live table back to where stale rows were left.
    store.begin_rebuild();
    let _first = write_ids(&store, &[1, 2, 3], 4);
    store.commit().unwrap();
    pump(&store);

    store.begin_rebuild();
    let _second = write_ids(&store, &[10], 4);
    store.commit().unwrap();
    pump(&store);

    store.begin_rebuild();
    let _third = write_ids(&store, &[20, 21], 4);
    store.commit().unwrap();
    pump(&store);

    assert_eq!(live_ids(&store), [20, 21]);
}

#[test]
fn failed_rebuild_leaves_live_table_untouched() {
    let dir = TempDir::new().unwrap();
    let store = open(config(&dir).with_max_payload_bytes(8), 2);
    assert!(store.init(checksum()));
    let receivers = write_ids(&store, &[1], 4);
    store.commit().unwrap();
    pump(&store);
    assert_eq!(results(receivers), [Ok(())]);
    let live = store.live_table();

    store.begin_rebuild();
    let receivers = write_ids(&store, &[1, 2], 64);
    store.commit().unwrap();
    pump(&store);

    assert!(
        results(receivers)
            .iter()
            .all(|r| matches!(r, Err(WriteError::PayloadTooLarge { .. })))
    );
    assert_eq!(store.live_table(), live);
    assert_eq!(store.marker().unwrap().unwrap().live, live);
    assert_eq!(live_ids(&store), [1]);
    assert_eq!(store.row_count(live.other()).unwrap(), 0);
}

#[test]
fn commits_defer_while_rebuild_in_flight() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    let live = store.live_table();

    store.begin_rebuild();
    let rebuild_rows = write_ids(&store, &[1, 2], 4);
    assert!(matches!(
        store.commit().unwrap(),
        CommitOutcome::Submitted { rebuild: true, .. }
    ));

    // No tick has run, so the rebuild cannot have completed yet.
    assert!(store.rebuild_in_flight());
    let late_rows = write_ids(&store, &[3], 4);
    assert_eq!(store.commit().unwrap(), CommitOutcome::Deferred);
    pump(&store);
    assert!(!store.rebuild_in_flight());
    assert_eq!(store.live_table(), live.other());

    assert_eq!(
        store.commit().unwrap(),
        CommitOutcome::Submitted {
            rows: 1,
            table: live.other(),
            rebuild: false
        }
    );
    pump(&store);

    assert!(results(rebuild_rows).iter().all(Result::is_ok));
    assert_eq!(results(late_rows), [Ok(())]);
    assert_eq!(live_ids(&store), [1, 2, 3]);
}

#[test]
fn unflipped_rebuild_is_ignored_on_reopen() {
    let dir = TempDir::new().unwrap();
    let live = {
        let store = ready_store(&dir);
        let _kept = write_ids(&store, &[1], 4);
        store.commit().unwrap();
        pump(&store);
        let live = store.live_table();

        store.begin_rebuild();
        let _lost = write_ids(&store, &[50, 51], 4);
        let background_before = store.scheduler().stats().background_runs;
        store.commit().unwrap();

        // Wait for the rebuild to reach disk, then stop without ticking.
        let deadline = Instant::now() + Duration::from_secs(10);
        while store.scheduler().stats().background_runs == background_before {
            assert!(Instant::now() < deadline, "rebuild never ran");
            thread::sleep(Duration::from_millis(1));
        }
        live
    };

    let store = open(config(&dir), 1);
    assert!(store.init(checksum()));
    assert_eq!(store.live_table(), live);
    assert_eq!(live_ids(&store), [1]);
    assert_eq!(store.row_count(live.other()).unwrap(), 2);
}

// =============================================================================
// Batches
// =============================================================================

#[test]
fn oversized_row_fails_entire_batch() {
    let dir = TempDir::new().unwrap();
    let store = open(config(&dir).with_max_payload_bytes(8), 2);
    assert!(store.init(checksum()));
    store.commit().unwrap();
    pump(&store);

    let mut receivers = write_ids(&store, &[1], 4);
    receivers.extend(write_ids(&store, &[2], 64));
    receivers.extend(write_ids(&store, &[3], 4));
    store.commit().unwrap();
    pump(&store);

    let results = results(receivers);
    assert_eq!(results.len(), 3);
    assert!(
        results
            .iter()
            .all(|r| matches!(r, Err(WriteError::PayloadTooLarge { size: 64, .. })))
    );
    assert_eq!(store.row_count(store.live_table()).unwrap(), 0);
    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(store.stats().failed_commits, 1);
}

#[test]
fn unserializable_value_fails_its_batch() {
    #[derive(Serialize)]
    struct Snapshot {
        hp: u32,
    }

    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);

    let (good, good_rx) = Completion::channel();
    store.write_json(RecordId(1), ENTITY, Utc::now(), &Snapshot { hp: 10 }, good);

    // Maps with non-string keys cannot be represented in JSON.
    let mut bad_value = BTreeMap::new();
    bad_value.insert(vec![1_u8], 1_u8);
    let (bad, bad_rx) = Completion::channel();
    store.write_json(RecordId(2), ENTITY, Utc::now(), &bad_value, bad);

    store.commit().unwrap();
    pump(&store);

    for result in results(vec![good_rx, bad_rx]) {
        assert!(matches!(result, Err(WriteError::Serialization { .. })));
    }
    assert!(live_ids(&store).is_empty());
}

#[test]
fn json_snapshot_round_trips_through_live_table() {
    #[derive(Serialize)]
    struct Snapshot<'a> {
        name: &'a str,
        hp: u32,
    }

    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    store.write_json(
        RecordId(3),
        ENTITY,
        Utc::now(),
        &Snapshot { name: "ogre", hp: 40 },
        Completion::ignore(),
    );
    store.commit().unwrap();
    pump(&store);

    let record = store.read_live(ENTITY, RecordId(3)).unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&record.payload).unwrap();
    assert_eq!(value["name"], "ogre");
    assert_eq!(value["hp"], 40);
}

#[test]
fn writes_from_producer_threads_are_committed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ready_store(&dir));
    let succeeded = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4_i64)
        .map(|producer| {
            let store = Arc::clone(&store);
            let succeeded = Arc::clone(&succeeded);
            thread::spawn(move || {
                for i in 0..25 {
                    let succeeded = Arc::clone(&succeeded);
                    store.write(
                        RecordId(producer * 100 + i),
                        ENTITY,
                        Utc::now(),
                        vec![1, 2, 3],
                        Completion::callback(move |result| {
                            if result.is_ok() {
                                succeeded.fetch_add(1, Ordering::SeqCst);
                            }
                        }),
                    );
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    store.commit().unwrap();
    pump(&store);

    assert_eq!(succeeded.load(Ordering::SeqCst), 100);
    assert_eq!(store.row_count(store.live_table()).unwrap(), 100);
    assert_eq!(store.stats().rows_written, 100);
}

#[test]
fn transactions_are_reused_across_ticks() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);

    for tick in 0..10 {
        let receivers = write_ids(&store, &[tick], 4);
        store.commit().unwrap();
        pump(&store);
        assert_eq!(results(receivers), [Ok(())]);
    }

    let stats = store.stats();
    assert_eq!(stats.pool_created, 1);
    assert_eq!(stats.pool_free, 1);
    assert_eq!(stats.commits, 11);
}

#[test]
fn empty_commit_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    assert_eq!(store.commit().unwrap(), CommitOutcome::Empty);
    assert_eq!(store.in_flight(), 0);
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn discarding_shutdown_reports_discarded_rows() {
    let dir = TempDir::new().unwrap();
    // No workers: commits stay queued until shutdown decides their fate.
    let scheduler = Arc::new(TaskScheduler::new(SchedulerConfig::default()));
    let store = EntityStore::new(config(&dir), Arc::clone(&scheduler)).unwrap();
    assert!(store.init(checksum()));

    let receivers = write_ids(&store, &[1, 2], 4);
    store.commit().unwrap();
    let report = scheduler.shutdown(true, true);

    assert_eq!(report.discarded, 1);
    assert_eq!(
        results(receivers),
        [Err(WriteError::Discarded), Err(WriteError::Discarded)]
    );
    assert_eq!(store.in_flight(), 0);
    assert_eq!(store.status(), StoreStatus::RebuildRequired);
    store.close().unwrap();
}

#[test]
fn draining_shutdown_completes_pending_commits() {
    let dir = TempDir::new().unwrap();
    let scheduler = Arc::new(TaskScheduler::new(SchedulerConfig::default()));
    let store = EntityStore::new(config(&dir), Arc::clone(&scheduler)).unwrap();
    assert!(store.init(checksum()));

    let receivers = write_ids(&store, &[1, 2], 4);
    store.commit().unwrap();
    let report = scheduler.shutdown(false, true);

    assert_eq!(report.ran_inline, 1);
    assert_eq!(results(receivers), [Ok(()), Ok(())]);
    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(live_ids(&store), [1, 2]);
}

#[test]
fn close_discards_uncommitted_rows() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir);
    let receivers = write_ids(&store, &[1], 4);

    store.close().unwrap();
    assert_eq!(results(receivers), [Err(WriteError::Discarded)]);
    assert_eq!(store.status(), StoreStatus::Uninitialized);
    assert!(matches!(store.marker(), Err(StoreError::Unusable)));

    let receivers = write_ids(&store, &[2], 4);
    assert_eq!(results(receivers), [Err(WriteError::StoreUnusable)]);
    assert_eq!(store.stats().in_flight, 0);
}

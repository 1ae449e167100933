//! The [`TaskScheduler`]: priority queue, worker pool and completion queue
//! behind one handle.
//!
//! # Threading contract
//!
//! The thread that constructs the scheduler is its **owner thread**. Only the
//! owner thread may call [`TaskScheduler::tick`] and
//! [`TaskScheduler::shutdown`], so every foreground phase runs there.
//! [`TaskScheduler::submit`] may be called from any thread.
//!
//! One scheduler is meant to be shared by otherwise unrelated subsystems.
//! Construct it once at the top level and hand an [`Arc`] to each
//! collaborator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::completion::{Completed, CompletionQueue};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::priority::Priority;
use crate::queue::PriorityTaskQueue;
use crate::task::{BackgroundOutcome, FnTask, Task};
use crate::worker::{self, WorkerHandle, WorkerState};

/// How long [`TaskScheduler::shutdown`] sleeps between completion checks.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifetime counters, updated with relaxed atomics.
#[derive(Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    background_runs: AtomicU64,
    background_faults: AtomicU64,
    foreground_runs: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    pub(crate) fn record_background(&self, faulted: bool) {
        self.background_runs.fetch_add(1, Ordering::Relaxed);
        if faulted {
            self.background_faults.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// State shared between the owner handle and every worker thread.
pub(crate) struct Shared {
    pub(crate) queue: PriorityTaskQueue,
    pub(crate) completions: CompletionQueue,
    pub(crate) counters: Counters,
}

#[derive(Default)]
struct WorkerSet {
    handles: Vec<WorkerHandle>,
    spawned: usize,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Background phases executed.
    pub background_runs: u64,
    /// Background phases that returned an error or panicked.
    pub background_faults: u64,
    /// Foreground phases executed on the owner thread.
    pub foreground_runs: u64,
    /// Queued tasks dropped by a discarding shutdown.
    pub discarded: u64,
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Tasks waiting for their foreground phase.
    pub awaiting_foreground: usize,
    /// Worker threads that have not yet been joined.
    pub workers: usize,
}

/// What a single [`TaskScheduler::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Foreground phases executed.
    pub foreground_runs: usize,
    /// Worker exit notices processed.
    pub workers_exited: usize,
}

/// What a [`TaskScheduler::shutdown`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued tasks dropped without running.
    pub discarded: usize,
    /// Foreground phases executed while waiting for workers.
    pub foreground_runs: usize,
    /// Tasks run on the owner thread because no worker was left.
    pub ran_inline: usize,
}

/// Priority worker pool with an owner-thread completion channel.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Mutex<WorkerSet>,
    config: SchedulerConfig,
    owner: ThreadId,
}

impl TaskScheduler {
    /// Create a scheduler owned by the calling thread, without workers.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: PriorityTaskQueue::new(),
                completions: CompletionQueue::new(),
                counters: Counters::default(),
            }),
            workers: Mutex::new(WorkerSet::default()),
            config,
            owner: thread::current().id(),
        }
    }

    /// Create a scheduler owned by the calling thread and start
    /// `config.worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] for an invalid configuration and
    /// [`SchedulerError::Spawn`] if a worker thread cannot be created.
    pub fn start(config: SchedulerConfig) -> Result<Arc<Self>, SchedulerError> {
        config.validate()?;
        let worker_count = config.worker_count;
        let scheduler = Arc::new(Self::new(config));
        scheduler.start_workers(worker_count)?;
        Ok(scheduler)
    }

    /// Spawn `count` additional worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ShutDown`] after shutdown, or
    /// [`SchedulerError::Spawn`] if a thread cannot be created. Workers
    /// spawned before the failure keep running.
    pub fn start_workers(&self, count: usize) -> Result<(), SchedulerError> {
        if self.shared.queue.is_closed() {
            return Err(SchedulerError::ShutDown);
        }

        let mut workers = self.lock_workers();
        for _ in 0..count {
            let id = workers.spawned;
            let name = format!("{}-{id}", self.config.thread_name_prefix);
            let handle = worker::spawn_worker(id, name, Arc::clone(&self.shared))?;
            workers.handles.push(handle);
            workers.spawned = workers.spawned.saturating_add(1);
        }

        debug!(count, total = workers.handles.len(), "workers started");
        Ok(())
    }

    /// Queue a task. Never blocks on capacity and never fails.
    ///
    /// Tasks submitted after a shutdown stay queued and are dropped with the
    /// scheduler.
    pub fn submit<T: Task>(&self, task: T, priority: Priority) {
        self.submit_boxed(Box::new(task), priority);
    }

    /// Queue an already boxed task.
    pub fn submit_boxed(&self, task: Box<dyn Task>, priority: Priority) {
        if self.shared.queue.is_closed() {
            warn!(task = task.name(), "task submitted after shutdown will not run");
        }
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.queue.push(task, priority);
    }

    /// Queue a background closure whose outcome is handed to `foreground` on
    /// the owner thread.
    pub fn submit_fn<B, F>(&self, priority: Priority, background: B, foreground: F)
    where
        B: FnOnce() -> BackgroundOutcome + Send + 'static,
        F: FnOnce(BackgroundOutcome) + Send + 'static,
    {
        self.submit(FnTask::new(background, foreground), priority);
    }

    /// Run every pending foreground phase, oldest first.
    ///
    /// Call once per iteration of the owner thread's loop. Items posted while
    /// the tick is running are left for the next tick.
    pub fn tick(&self) -> TickReport {
        debug_assert!(
            self.is_owner_thread(),
            "TaskScheduler::tick called off the owner thread"
        );

        let mut report = TickReport::default();
        for item in self.shared.completions.drain() {
            match item {
                Completed::Task { task, outcome } => {
                    task.run_foreground(outcome);
                    self.shared
                        .counters
                        .foreground_runs
                        .fetch_add(1, Ordering::Relaxed);
                    report.foreground_runs = report.foreground_runs.saturating_add(1);
                }
                Completed::WorkerExited { worker_id } => {
                    self.reap_worker(worker_id);
                    report.workers_exited = report.workers_exited.saturating_add(1);
                }
            }
        }
        report
    }

    /// Stop the worker pool.
    ///
    /// Workers finish the task they are running and then stop. With
    /// `discard_pending`, tasks still queued are dropped without running;
    /// otherwise workers drain them first. With `wait_for_workers`, this
    /// blocks until every worker has posted its exit notice, running
    /// foreground phases as they arrive, and then runs any task still queued
    /// on the owner thread so that no accepted task is left behind.
    pub fn shutdown(&self, discard_pending: bool, wait_for_workers: bool) -> ShutdownReport {
        debug_assert!(
            self.is_owner_thread(),
            "TaskScheduler::shutdown called off the owner thread"
        );
        info!(discard_pending, wait_for_workers, "scheduler shutting down");

        let discarded = self.shared.queue.close(discard_pending);
        let mut report = ShutdownReport {
            discarded: discarded.len(),
            ..ShutdownReport::default()
        };
        self.shared.counters.discarded.fetch_add(
            u64::try_from(discarded.len()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        drop(discarded);

        if !wait_for_workers {
            return report;
        }

        loop {
            let tick = self.tick();
            report.foreground_runs = report.foreground_runs.saturating_add(tick.foreground_runs);
            if self.lock_workers().handles.is_empty() {
                break;
            }
            self.shared.completions.wait_for_items(SHUTDOWN_POLL_INTERVAL);
        }

        while let Some((_, mut task)) = self.shared.queue.try_pop() {
            let outcome = worker::run_background_phase(task.as_mut());
            self.shared.counters.record_background(outcome.is_err());
            task.run_foreground(outcome);
            self.shared
                .counters
                .foreground_runs
                .fetch_add(1, Ordering::Relaxed);
            report.ran_inline = report.ran_inline.saturating_add(1);
        }

        info!(
            discarded = report.discarded,
            foreground_runs = report.foreground_runs,
            ran_inline = report.ran_inline,
            "scheduler shut down"
        );
        report
    }

    /// Current counters and queue depths.
    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.shared.counters;
        SchedulerStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            background_runs: counters.background_runs.load(Ordering::Relaxed),
            background_faults: counters.background_faults.load(Ordering::Relaxed),
            foreground_runs: counters.foreground_runs.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            queued: self.shared.queue.len(),
            awaiting_foreground: self.shared.completions.len(),
            workers: self.lock_workers().handles.len(),
        }
    }

    /// State of every worker that has not been joined yet, by worker index.
    pub fn worker_states(&self) -> Vec<(usize, WorkerState)> {
        self.lock_workers()
            .handles
            .iter()
            .map(|handle| (handle.id, handle.state()))
            .collect()
    }

    /// Whether the calling thread is the owner thread.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.is_closed()
    }

    fn reap_worker(&self, worker_id: usize) {
        let handle = {
            let mut workers = self.lock_workers();
            workers
                .handles
                .iter()
                .position(|handle| handle.id == worker_id)
                .map(|index| workers.handles.swap_remove(index))
        };
        if let Some(mut handle) = handle {
            handle.join();
            debug!(worker_id, "worker joined");
        }
    }

    fn lock_workers(&self) -> MutexGuard<'_, WorkerSet> {
        self.workers.lock()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        // Unjoined workers are detached; they exit once the closed queue is empty.
        let pending = self.shared.queue.close(true);
        if !pending.is_empty() {
            debug!(discarded = pending.len(), "scheduler dropped with queued tasks");
        }
    }
}

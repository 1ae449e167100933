//! Worker threads and their state machine.
//!
//! ```text
//! Idle --pop--> Running --post completion--> Idle
//!   |                                          |
//!   +------ queue closed (between tasks) ------+--> Stopping --queue empty--> Stopped
//! ```
//!
//! A worker never abandons a task in progress. Once it leaves the loop it
//! posts [`Completed::WorkerExited`] so the owner thread can do the
//! bookkeeping for the exit.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::completion::Completed;
use crate::scheduler::Shared;
use crate::task::{BackgroundOutcome, Task, TaskFault};

/// Lifecycle state of a single worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for a task.
    Idle,
    /// Executing a task's background phase.
    Running,
    /// Shutdown was requested; finishing remaining work before exit.
    Stopping,
    /// Left the worker loop.
    Stopped,
}

impl WorkerState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Stopped => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Owner-side handle to one spawned worker.
pub(crate) struct WorkerHandle {
    pub(crate) id: usize,
    state: Arc<AtomicU8>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Join the thread. Only called after its exit notice was observed.
    pub(crate) fn join(&mut self) {
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            warn!(worker_id = self.id, "worker thread terminated abnormally");
        }
    }
}

/// Spawn a worker thread running [`worker_loop`].
pub(crate) fn spawn_worker(
    id: usize,
    thread_name: String,
    shared: Arc<Shared>,
) -> std::io::Result<WorkerHandle> {
    let state = Arc::new(AtomicU8::new(WorkerState::Idle.to_u8()));
    let thread_state = Arc::clone(&state);
    let join = thread::Builder::new()
        .name(thread_name)
        .spawn(move || worker_loop(id, &shared, &thread_state))?;

    Ok(WorkerHandle {
        id,
        state,
        join: Some(join),
    })
}

fn worker_loop(worker_id: usize, shared: &Shared, state: &AtomicU8) {
    debug!(worker_id, "worker started");

    loop {
        let between = if shared.queue.is_closed() {
            WorkerState::Stopping
        } else {
            WorkerState::Idle
        };
        state.store(between.to_u8(), Ordering::Release);

        let Some((priority, mut task)) = shared.queue.pop_blocking() else {
            break;
        };

        state.store(WorkerState::Running.to_u8(), Ordering::Release);
        let name = task.name();
        trace!(worker_id, task = name, %priority, "running background phase");

        let outcome = run_background_phase(task.as_mut());
        shared.counters.record_background(outcome.is_err());
        if let Err(fault) = &outcome {
            warn!(worker_id, task = name, %fault, "background phase faulted");
        }

        shared.completions.push(Completed::Task { task, outcome });
    }

    state.store(WorkerState::Stopped.to_u8(), Ordering::Release);
    debug!(worker_id, "worker stopped");
    shared.completions.push(Completed::WorkerExited { worker_id });
}

/// Run a background phase, converting a panic into a [`TaskFault`].
pub(crate) fn run_background_phase(task: &mut dyn Task) -> BackgroundOutcome {
    catch_unwind(AssertUnwindSafe(|| task.run_background()))
        .unwrap_or_else(|payload| Err(TaskFault::from_panic(payload.as_ref())))
}

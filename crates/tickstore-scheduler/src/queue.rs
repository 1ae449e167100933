//! Thread-safe priority queue feeding the worker pool.
//!
//! Ordering is by [`Priority`] (highest first), then by submission sequence
//! (oldest first), so equal-priority tasks keep FIFO order. The queue is
//! unbounded: pushing never waits for capacity, only for the internal lock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::priority::Priority;
use crate::task::Task;

/// Heap entry. Only `priority` and `seq` take part in ordering.
struct QueuedTask {
    priority: Priority,
    seq: u64,
    task: Box<dyn Task>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the lower sequence number.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
    closed: bool,
}

/// Queue of `(priority, task)` pairs with a blocking pop.
pub struct PriorityTaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl Default for PriorityTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityTaskQueue {
    /// Create an empty, open queue.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue a task and wake one waiting worker.
    pub fn push(&self, task: Box<dyn Task>, priority: Priority) {
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq = state.next_seq.wrapping_add(1);
            state.heap.push(QueuedTask {
                priority,
                seq,
                task,
            });
        }
        self.ready.notify_one();
    }

    /// Dequeue the most urgent task, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been closed and holds no more tasks.
    pub fn pop_blocking(&self) -> Option<(Priority, Box<dyn Task>)> {
        let mut state = self.lock();
        self.ready
            .wait_while(&mut state, |s| s.heap.is_empty() && !s.closed);
        state.heap.pop().map(|entry| (entry.priority, entry.task))
    }

    /// Dequeue the most urgent task without blocking.
    pub fn try_pop(&self) -> Option<(Priority, Box<dyn Task>)> {
        self.lock()
            .heap
            .pop()
            .map(|entry| (entry.priority, entry.task))
    }

    /// Close the queue and wake every waiting worker.
    ///
    /// With `discard` set, queued tasks are removed and returned in the
    /// order they would have run; otherwise they stay queued and workers
    /// keep draining them before [`pop_blocking`](Self::pop_blocking)
    /// starts returning `None`.
    pub fn close(&self, discard: bool) -> Vec<Box<dyn Task>> {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            if discard {
                let mut drained = Vec::with_capacity(state.heap.len());
                while let Some(entry) = state.heap.pop() {
                    drained.push(entry.task);
                }
                drained
            } else {
                Vec::new()
            }
        };
        self.ready.notify_all();
        discarded
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether no tasks are waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }
}

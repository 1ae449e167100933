//! FIFO of finished background phases waiting for the owner thread.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::task::{BackgroundOutcome, Task};

/// An item posted by a worker for the owner thread.
pub enum Completed {
    /// A task whose background phase has finished.
    Task {
        /// The task, owned by the queue until its foreground phase runs.
        task: Box<dyn Task>,
        /// Outcome of the background phase.
        outcome: BackgroundOutcome,
    },

    /// A worker thread has left its loop and is about to exit.
    WorkerExited {
        /// Index of the worker within its pool.
        worker_id: usize,
    },
}

/// Unbounded channel written by workers and drained by the owner thread.
pub struct CompletionQueue {
    sender: Sender<Completed>,
    receiver: Receiver<Completed>,
    /// An item received by [`wait_for_items`](Self::wait_for_items) and not
    /// yet drained. Always older than anything still in the channel.
    held: Mutex<Option<Completed>>,
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            held: Mutex::new(None),
        }
    }

    /// Append an item and wake the owner thread if it is waiting.
    pub fn push(&self, item: Completed) {
        // The queue owns the receiver, so the channel never disconnects.
        let _ = self.sender.send(item);
    }

    /// Take every item posted so far, oldest first.
    pub fn drain(&self) -> VecDeque<Completed> {
        let mut items: VecDeque<Completed> = self.held.lock().take().into_iter().collect();
        items.extend(self.receiver.try_iter());
        items
    }

    /// Block until at least one item is queued or `timeout` elapses.
    ///
    /// Returns whether the queue is non-empty.
    pub fn wait_for_items(&self, timeout: Duration) -> bool {
        let mut held = self.held.lock();
        if held.is_some() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => {
                *held = Some(item);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        let held = usize::from(self.held.lock().is_some());
        self.receiver.len().saturating_add(held)
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.held.lock().is_none() && self.receiver.is_empty()
    }
}

//! Scheduler configuration.
//!
//! Supplied once at construction as plain data. The struct derives
//! [`Deserialize`] so a host can embed it in its own configuration file.

use serde::Deserialize;

use crate::error::SchedulerError;

/// Default number of worker threads.
const DEFAULT_WORKER_COUNT: usize = 2;

/// Configuration for a [`TaskScheduler`](crate::TaskScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads started by
    /// [`TaskScheduler::start`](crate::TaskScheduler::start).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Prefix for worker thread names; the worker index is appended.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Check the configuration for values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if `worker_count` is zero or the
    /// thread name prefix is empty.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_count == 0 {
            return Err(SchedulerError::Config {
                message: String::from("worker_count must be at least 1"),
            });
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(SchedulerError::Config {
                message: String::from("thread_name_prefix must not be empty"),
            });
        }
        Ok(())
    }
}

const fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_thread_name_prefix() -> String {
    String::from("tickstore-worker")
}

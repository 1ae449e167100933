//! Error types for the scheduler.

/// Errors returned by [`TaskScheduler`](crate::TaskScheduler) setup and
/// lifecycle calls.
///
/// Task failures are not reported here; they surface as a
/// [`TaskFault`](crate::TaskFault) in the failing task's foreground phase.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The operating system refused to create a worker thread.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The scheduler configuration is invalid.
    #[error("invalid scheduler config: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },

    /// Workers cannot be started after shutdown.
    #[error("scheduler has been shut down")]
    ShutDown,
}

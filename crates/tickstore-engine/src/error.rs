//! Error types for the engine binary.

/// Top-level error for the engine binary.
///
/// Wraps every subsystem error so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine configuration file could not be read or parsed.
    #[error("config error: {message}")]
    Config {
        /// Description of the config failure.
        message: String,
    },

    /// The task scheduler failed to start.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: tickstore_scheduler::SchedulerError,
    },

    /// The entity store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: tickstore_db::StoreError,
    },
}

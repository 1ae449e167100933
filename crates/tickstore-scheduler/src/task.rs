//! The [`Task`] interface shared by every kind of scheduled work.
//!
//! A task has two ordered phases:
//!
//! 1. [`Task::run_background`] runs on a worker thread.
//! 2. [`Task::run_foreground`] runs afterwards on the owner thread, during
//!    [`TaskScheduler::tick`], and receives the outcome of phase one.
//!
//! The queue owns a submitted task exclusively until its foreground phase
//! consumes it, so a task stays alive across both phases without shared
//! ownership.
//!
//! [`TaskScheduler::tick`]: crate::TaskScheduler::tick

use std::any::Any;

/// Result of a task's background phase, as observed by its foreground phase.
pub type BackgroundOutcome = Result<(), TaskFault>;

/// A fault raised while running a task's background phase.
///
/// Faults are local to the task that raised them. They never stop the
/// worker thread and never affect other tasks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFault {
    /// The background phase returned an error.
    #[error("task failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// The background phase panicked and the panic was caught by the worker.
    #[error("task panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl TaskFault {
    /// Build a [`TaskFault::Failed`] from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Convert a caught panic payload into a fault.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| String::from("non-string panic payload"));
        Self::Panicked { message }
    }
}

/// A unit of work with a background phase and an owner-thread phase.
pub trait Task: Send + 'static {
    /// Short name used in log fields.
    fn name(&self) -> &'static str {
        "task"
    }

    /// Run off the owner thread.
    ///
    /// Returning an error, or panicking, is reported to
    /// [`Task::run_foreground`] as a [`TaskFault`].
    fn run_background(&mut self) -> BackgroundOutcome;

    /// Run on the owner thread once the background phase has finished.
    ///
    /// Consumes the task. The default does nothing.
    fn run_foreground(self: Box<Self>, _outcome: BackgroundOutcome) {}
}

/// Adapter that turns a pair of closures into a [`Task`].
///
/// Lets existing callback-style code use the scheduler without defining a
/// task type.
pub struct FnTask<B, F> {
    name: &'static str,
    background: Option<B>,
    foreground: Option<F>,
}

impl<B, F> FnTask<B, F>
where
    B: FnOnce() -> BackgroundOutcome + Send + 'static,
    F: FnOnce(BackgroundOutcome) + Send + 'static,
{
    /// Wrap a background closure and the owner-thread closure that receives
    /// its outcome.
    pub const fn new(background: B, foreground: F) -> Self {
        Self {
            name: "fn_task",
            background: Some(background),
            foreground: Some(foreground),
        }
    }

    /// Set the name reported in log fields.
    #[must_use]
    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<B, F> Task for FnTask<B, F>
where
    B: FnOnce() -> BackgroundOutcome + Send + 'static,
    F: FnOnce(BackgroundOutcome) + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn run_background(&mut self) -> BackgroundOutcome {
        self.background.take().map_or(Ok(()), |background| background())
    }

    fn run_foreground(self: Box<Self>, outcome: BackgroundOutcome) {
        if let Some(foreground) = self.foreground {
            foreground(outcome);
        }
    }
}

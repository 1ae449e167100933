//! Background task execution for the tickstore persistence engine.
//!
//! A [`TaskScheduler`] owns a [`PriorityTaskQueue`], a fixed pool of worker
//! threads and a [`CompletionQueue`]. Work is submitted as a [`Task`] with a
//! [`Priority`]; a worker runs its background phase, and the owner thread
//! runs its foreground phase during [`TaskScheduler::tick`].
//!
//! ```text
//! submit(task, priority)
//!     |
//!     v
//! PriorityTaskQueue --pop--> worker: run_background()
//!                                   |
//!                                   v
//!                            CompletionQueue --tick()--> owner: run_foreground()
//! ```
//!
//! # Modules
//!
//! - [`priority`] -- Priority bands.
//! - [`task`] -- The [`Task`] trait, [`TaskFault`] and the [`FnTask`] adapter.
//! - [`queue`] -- [`PriorityTaskQueue`].
//! - [`completion`] -- [`CompletionQueue`].
//! - [`worker`] -- Worker loop and [`WorkerState`].
//! - [`scheduler`] -- [`TaskScheduler`].
//! - [`config`] -- [`SchedulerConfig`].
//! - [`error`] -- [`SchedulerError`].

pub mod completion;
pub mod config;
pub mod error;
pub mod priority;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use completion::{Completed, CompletionQueue};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use priority::Priority;
pub use queue::PriorityTaskQueue;
pub use scheduler::{SchedulerStats, ShutdownReport, TaskScheduler, TickReport};
pub use task::{BackgroundOutcome, FnTask, Task, TaskFault};
pub use worker::WorkerState;

//! Completion handles: how the caller of `write` learns the fate of a row.
//!
//! A handle fires exactly once. It fires on the owner thread when the row's
//! transaction has been committed or has failed, or on the calling thread
//! when `write` rejects the row up front. A handle dropped without firing
//! reports [`WriteError::Discarded`], so every row is answered even when
//! pending work is thrown away at shutdown.

use tokio::sync::oneshot;

use crate::error::WriteError;

/// Outcome of a single row write.
pub type WriteResult = Result<(), WriteError>;

/// Receiving side of [`Completion::channel`].
///
/// Await it from async code, or use `try_recv`/`blocking_recv` from threads.
pub type CompletionReceiver = oneshot::Receiver<WriteResult>;

enum Notify {
    Callback(Box<dyn FnOnce(WriteResult) + Send>),
    Channel(oneshot::Sender<WriteResult>),
    Ignore,
}

impl Notify {
    fn fire(self, result: WriteResult) {
        match self {
            Self::Callback(callback) => callback(result),
            Self::Channel(sender) => {
                // The receiver may have been dropped; nobody is listening then.
                let _ = sender.send(result);
            }
            Self::Ignore => {}
        }
    }
}

/// One-shot notification of a row write's outcome.
pub struct Completion {
    notify: Option<Notify>,
}

impl Completion {
    /// Invoke `callback` with the outcome.
    pub fn callback<F>(callback: F) -> Self
    where
        F: FnOnce(WriteResult) + Send + 'static,
    {
        Self {
            notify: Some(Notify::Callback(Box::new(callback))),
        }
    }

    /// Deliver the outcome through a channel.
    pub fn channel() -> (Self, CompletionReceiver) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                notify: Some(Notify::Channel(sender)),
            },
            receiver,
        )
    }

    /// Drop the outcome.
    pub const fn ignore() -> Self {
        Self {
            notify: Some(Notify::Ignore),
        }
    }

    /// Fire the handle with `result`.
    pub fn complete(mut self, result: WriteResult) {
        if let Some(notify) = self.notify.take() {
            notify.fire(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(notify) = self.notify.take() {
            notify.fire(Err(WriteError::Discarded));
        }
    }
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match &self.notify {
            Some(Notify::Callback(_)) => "callback",
            Some(Notify::Channel(_)) => "channel",
            Some(Notify::Ignore) => "ignore",
            None => "fired",
        };
        f.debug_struct("Completion").field("kind", &kind).finish()
    }
}

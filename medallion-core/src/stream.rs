//! Run-scoped cancellation and handles for background runs.

use std::sync::Arc;

use medallion_types::{PipelineError, PipelineRunResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Abstraction over a task handle that can be queried for completion and aborted.
pub trait Abortable {
    /// Abort the underlying task if it is still running.
    fn abort(&mut self);
    /// Return `true` if the underlying task has completed.
    fn is_finished(&self) -> bool;
}

impl<T> Abortable for JoinHandle<T> {
    fn abort(&mut self) {
        // JoinHandle::abort takes &self
        Self::abort(self);
    }

    fn is_finished(&self) -> bool {
        Self::is_finished(self)
    }
}

/// Abstraction over a best-effort stop signal.
pub trait Stoppable {
    /// Request graceful shutdown.
    fn stop(self);
}

/// Cloneable run-scoped cancellation signal.
///
/// Cancellation is observed between records; a record already inside a
/// stage finishes that stage.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// True once `cancel` has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Stoppable for CancelToken {
    fn stop(self) {
        self.cancel();
    }
}

/// Drop-time logic for run handles:
/// - send a best-effort stop signal if present
/// - abort the task if it hasn't finished yet
pub fn drop_impl<H, S>(inner: &mut Option<H>, stop: &mut Option<S>)
where
    H: Abortable,
    S: Stoppable,
{
    if let Some(s) = stop.take() {
        s.stop();
    }
    if let Some(mut h) = inner.take()
        && !h.is_finished()
    {
        h.abort();
    }
}

/// Handle to a background run.
///
/// Dropping the handle without calling [`RunHandle::join`] cancels the run.
#[derive(Debug)]
pub struct RunHandle {
    join: Option<JoinHandle<PipelineRunResult>>,
    cancel: Option<CancelToken>,
}

impl RunHandle {
    /// Wrap a spawned run and its cancellation token.
    #[must_use]
    pub const fn new(join: JoinHandle<PipelineRunResult>, cancel: CancelToken) -> Self {
        Self {
            join: Some(join),
            cancel: Some(cancel),
        }
    }

    /// Request cancellation; records not yet started are dead-lettered as cancelled.
    pub fn cancel(&self) {
        if let Some(c) = &self.cancel {
            c.cancel();
        }
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn token(&self) -> Option<CancelToken> {
        self.cancel.clone()
    }

    /// True once the run task has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the run to finish and return its cumulative result.
    ///
    /// # Errors
    /// Returns `Cancelled` if the task was aborted or panicked.
    pub async fn join(mut self) -> Result<PipelineRunResult, PipelineError> {
        self.cancel.take();
        let Some(join) = self.join.take() else {
            return Err(PipelineError::Cancelled);
        };
        join.await.map_err(|_| PipelineError::Cancelled)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        drop_impl(&mut self.join, &mut self.cancel);
    }
}

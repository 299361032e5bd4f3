//! Per-transport task serialization.
//!
//! Every piece of work that touches a transport's connections or
//! multiplexer is funnelled through one [`Executor`], which guarantees that
//! at most one such task runs at a time. Public API methods may be called
//! from any thread; they enqueue work here and return promptly.

use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Serialization primitive layered over the Tokio runtime.
///
/// Jobs are queued unbounded and drained by a single driver task in FIFO
/// order, one at a time, so two jobs dispatched here can never observe the
/// transport mid-mutation. The driver exits once every handle has been
/// dropped and the queue has drained.
#[derive(Clone)]
pub struct Executor {
    tx: mpsc::UnboundedSender<Job>,
}

impl Executor {
    /// Create an executor and spawn its driver on the current runtime.
    ///
    /// # Panics
    /// Panics outside a Tokio runtime context.
    #[must_use]
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx }
    }

    /// Queue `job` to run after all previously dispatched work.
    ///
    /// Jobs dispatched after the driver has gone away are dropped; this
    /// only happens during teardown of the owning runtime.
    pub fn dispatch(&self, job: impl Future<Output = ()> + Send + 'static) {
        if self.tx.send(Box::pin(job)).is_err() {
            tracing::trace!("executor gone, dropping dispatched task");
        }
    }

    /// Wait until every job dispatched before this call has completed.
    ///
    /// Used by shutdown paths and tests to observe quiescence.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.dispatch(async move {
            let _ = done_tx.send(());
        });
        let _ = done_rx.await;
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

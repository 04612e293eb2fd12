//! # Writer Context
//!
//! A single logical writer: jobs submitted from anywhere run one at a time,
//! in submission order, on one background task. The catalog and playlist
//! stores route every mutation through a shared `WriterContext` so two
//! concurrent completions can never interleave their read-modify-write.
//!
//! - [`WriterContext::run`] submits a job and waits for its result.
//! - [`WriterContext::enqueue`] submits a job and returns immediately.
//! - [`WriterContext::flush`] waits until everything submitted so far has run.
//!
//! A job must never `run` or `flush` on the writer it is running on; it would
//! wait for itself. `enqueue` from inside a job is fine.

use crate::error::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handle to a serialized writer task. Clones submit to the same queue.
///
/// The background task stops once every handle is dropped and the queue is
/// drained.
#[derive(Clone)]
pub struct WriterContext {
    sender: mpsc::UnboundedSender<Job>,
}

impl WriterContext {
    /// Spawn the writer task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    error!("Writer job panicked");
                }
            }
            debug!("Writer context stopped");
        });

        Self { sender }
    }

    /// Run `job` on the writer and wait for its output.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::pin(async move {
            let _ = tx.send(job.await);
        }))?;

        rx.await
            .map_err(|_| Error::Internal("Writer job did not complete".to_string()))
    }

    /// Queue `job` without waiting for it.
    pub fn enqueue<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(Box::pin(job))
    }

    /// Wait until every job submitted before this call has finished.
    pub async fn flush(&self) -> Result<()> {
        self.run(async {}).await
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.sender.send(job).map_err(|_| Error::WriterClosed)
    }
}

impl std::fmt::Debug for WriterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterContext")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

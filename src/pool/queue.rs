//! Strict FIFO execution for backends that cannot run statements concurrently.
//!
//! One task runs at a time. After each task completes the worker waits
//! `request_interval` before starting the next one.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::PoolError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handle to a serial worker task. Cloning shares the same queue.
#[derive(Clone)]
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl SerialQueue {
    /// Spawn the worker. Requires a running tokio runtime.
    pub fn spawn(request_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            tracing::debug!(?request_interval, "Serial queue started");
            while let Some(job) = rx.recv().await {
                job.await;
                if !request_interval.is_zero() {
                    tokio::time::sleep(request_interval).await;
                }
            }
            tracing::debug!("Serial queue stopped");
        });

        Self { tx }
    }

    /// Enqueue `task` and wait for its output.
    ///
    /// # Errors
    /// `QueueClosed` if the worker has stopped.
    pub async fn run<F, T>(&self, task: F) -> Result<T, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = done_tx.send(task.await);
        });
        self.tx.send(job).map_err(|_| PoolError::QueueClosed)?;
        done_rx.await.map_err(|_| PoolError::QueueClosed)
    }
}

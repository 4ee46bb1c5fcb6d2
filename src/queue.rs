//! Serialized execution of session jobs.

use crate::Error;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace};

/// A FIFO of async jobs executed one at a time, in submission order.
///
/// Cloning yields another handle onto the same queue. The worker task lives
/// as long as any handle does.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
    pending: Arc<AtomicUsize>,
}

impl JobQueue {
    /// Starts the worker on the current Tokio runtime.
    ///
    /// Fails with [`Error::Queue`] when called outside a runtime.
    pub fn new() -> Result<Self, Error> {
        let runtime = Handle::try_current()
            .map_err(|err| Error::Queue(format!("no Tokio runtime to run the queue on: {err}")))?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                worker_pending.fetch_sub(1, Ordering::SeqCst);
                // Run each job on its own task so a panic stays contained.
                if let Err(err) = tokio::spawn(job).await {
                    error!(error = %err, "queued job aborted");
                }
            }
        });

        Ok(Self { sender, pending })
    }

    /// Enqueues `task` and returns a handle resolving to its result.
    ///
    /// Nothing runs until every job submitted before it has finished.
    /// Dropping the handle does not cancel the job.
    pub fn submit<F, R>(&self, task: F) -> JobHandle<R>
    where
        F: Future<Output = Result<R, Error>> + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job = async move {
            let result = task.await;
            // The caller may have dropped its handle.
            let _ = result_tx.send(result);
        }
        .boxed();

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        trace!(pending = self.size(), "job submitted");

        JobHandle { receiver: result_rx }
    }

    /// Jobs submitted but not yet started.
    pub fn size(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Completion handle for a queued job.
#[must_use = "a job handle does nothing unless awaited"]
pub struct JobHandle<R> {
    receiver: oneshot::Receiver<Result<R, Error>>,
}

impl<R> Future for JobHandle<R> {
    type Output = Result<R, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(Error::Queue("job dropped before completing".to_string())))
        })
    }
}

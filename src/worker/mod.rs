//! Fixed-size pool of refresh workers.
//!
//! Workers share one bounded queue. [`WorkerPool::push`] waits for room, so a
//! saturated pool slows down whoever produced the batch instead of dropping
//! jobs. A panicking job is logged and the worker carries on.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::reader::FeedHandler;
use crate::scheduler::Job;
use crate::{FeedloomError, Result};

/// Processes one job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

#[async_trait]
impl JobHandler for FeedHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        self.refresh_feed(job.user_id, job.feed_id, false)
            .await
            .map(|summary| {
                debug!(
                    feed_id = job.feed_id,
                    new_entries = summary.new_entries,
                    not_modified = summary.not_modified,
                    "Job done"
                )
            })
    }
}

/// Handle on the running workers.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    pub fn new(size: usize, queue_capacity: usize, handler: Arc<dyn JobHandler>) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let handler = handler.clone();
                tokio::spawn(run_worker(id, receiver, handler))
            })
            .collect::<Vec<_>>();

        info!("Worker pool started with {} workers", workers.len());
        Self { sender, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue jobs, waiting while the queue is full.
    pub async fn push(&self, jobs: Vec<Job>) -> Result<()> {
        for job in jobs {
            self.sender
                .send(job)
                .await
                .map_err(|_| FeedloomError::WorkerPoolClosed)?;
        }
        Ok(())
    }

    /// Stop accepting jobs and wait until every queued job is done.
    pub async fn wait(self) {
        drop(self.sender);
        futures::future::join_all(self.workers).await;
        info!("Worker pool stopped");
    }

    /// Stop accepting jobs and wait for the workers to drain the queue.
    ///
    /// Workers still busy after `grace` are aborted. Returns true if every
    /// worker finished on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let Self { sender, workers } = self;
        drop(sender);

        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        match tokio::time::timeout(grace, futures::future::join_all(workers)).await {
            Ok(_) => {
                info!("Worker pool stopped");
                true
            }
            Err(_) => {
                warn!(
                    "Worker pool did not stop within {:?}, aborting remaining jobs",
                    grace
                );
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    handler: Arc<dyn JobHandler>,
) {
    debug!(worker = id, "Worker started");
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        debug!(
            worker = id,
            user_id = job.user_id,
            feed_id = job.feed_id,
            feed_url = %job.feed_url,
            "Processing job"
        );
        match AssertUnwindSafe(handler.handle(&job)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(FeedloomError::RefreshInProgress(feed_id))) => {
                debug!(worker = id, feed_id, "Feed already being refreshed, skipping");
            }
            Ok(Err(e)) => {
                warn!(worker = id, feed_id = job.feed_id, "Refresh failed: {}", e);
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    worker = id,
                    feed_id = job.feed_id,
                    "Refresh panicked: {}",
                    reason
                );
            }
        }
    }
    debug!(worker = id, "Worker stopped");
}

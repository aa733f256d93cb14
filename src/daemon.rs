//! Long-running service: periodic batch scheduling and cleanup.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{CleanupConfig, PollingConfig};
use crate::db::Database;
use crate::entry::{EntryRepository, EntryStatus};
use crate::scheduler::{enqueue_batch, BatchBuilder};
use crate::worker::WorkerPool;
use crate::Result;

/// Entries archived by one cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub read_archived: u64,
    pub unread_archived: u64,
}

/// Background service owning the worker pool.
pub struct Daemon {
    db: Database,
    workers: WorkerPool,
    polling: PollingConfig,
    cleanup: CleanupConfig,
    shutdown_grace: Duration,
    background: Vec<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(
        db: Database,
        workers: WorkerPool,
        polling: PollingConfig,
        cleanup: CleanupConfig,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            db,
            workers,
            polling,
            cleanup,
            shutdown_grace,
            background: Vec::new(),
        }
    }

    /// Task to wait for after the workers stopped, such as the integration dispatcher.
    pub fn with_background_task(mut self, handle: JoinHandle<()>) -> Self {
        self.background.push(handle);
        self
    }

    /// Enqueue every enabled feed that is due and below the error ceiling.
    pub async fn schedule_feeds(&self) -> Result<usize> {
        let builder = BatchBuilder::new(self.db.pool())
            .with_batch_size(self.polling.batch_size)
            .with_error_limit(self.polling.parsing_error_limit)
            .with_next_check_expired()
            .without_disabled_feeds();
        enqueue_batch(&builder, &self.workers).await
    }

    /// Archive old read and unread entries.
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        let entries = EntryRepository::new(self.db.pool());
        let now = Utc::now();
        let report = CleanupReport {
            read_archived: entries
                .archive_entries(
                    EntryStatus::Read,
                    self.cleanup.archive_read_days,
                    self.cleanup.archive_batch_size,
                    now,
                )
                .await?,
            unread_archived: entries
                .archive_entries(
                    EntryStatus::Unread,
                    self.cleanup.archive_unread_days,
                    self.cleanup.archive_batch_size,
                    now,
                )
                .await?,
        };
        info!(
            "Cleanup archived {} read and {} unread entries",
            report.read_archived, report.unread_archived
        );
        Ok(report)
    }

    /// Run until `shutdown` resolves, then stop in order: scheduling, workers
    /// (bounded by the grace period), background tasks, database.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Daemon started (batch every {}s, cleanup every {}h, {} workers)",
            self.polling.frequency_secs,
            self.cleanup.frequency_hours,
            self.workers.size()
        );

        let mut feed_ticker = interval(Duration::from_secs(self.polling.frequency_secs.max(1)));
        feed_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_ticker =
            interval(Duration::from_secs(self.cleanup.frequency_hours.max(1) * 3600));
        cleanup_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = feed_ticker.tick() => {
                    // Enqueueing may wait on busy workers; stay responsive to shutdown.
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        result = self.schedule_feeds() => {
                            if let Err(e) = result {
                                error!("Unable to schedule feeds: {}", e);
                            }
                        }
                    }
                }
                _ = cleanup_ticker.tick() => {
                    if let Err(e) = self.run_cleanup().await {
                        error!("Cleanup failed: {}", e);
                    }
                }
            }
        }

        info!("Shutting down");
        let Self {
            db,
            workers,
            shutdown_grace,
            background,
            ..
        } = self;

        workers.shutdown(shutdown_grace).await;
        for handle in background {
            let abort = handle.abort_handle();
            if tokio::time::timeout(shutdown_grace, handle).await.is_err() {
                warn!("Background task did not stop in time");
                abort.abort();
            }
        }
        db.close().await;
        info!("Daemon stopped");
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            _ => warn!("Unable to install signal handlers, falling back to Ctrl-C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

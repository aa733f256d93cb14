//! Batch selection of feeds due for refresh.

use chrono::Utc;
use sqlx::QueryBuilder;
use tracing::{debug, info};

use crate::datetime::to_db;
use crate::db::DbPool;
use crate::worker::WorkerPool;
use crate::{FeedloomError, Result};

/// A request to refresh one feed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Job {
    pub user_id: i64,
    pub feed_id: i64,
    pub feed_url: String,
}

/// Composable query over feeds, producing refresh jobs.
///
/// ```no_run
/// # async fn run(pool: &feedloom::db::DbPool) -> feedloom::Result<()> {
/// use feedloom::scheduler::BatchBuilder;
///
/// let jobs = BatchBuilder::new(pool)
///     .with_batch_size(100)
///     .with_error_limit(3)
///     .with_next_check_expired()
///     .without_disabled_feeds()
///     .fetch_jobs()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct BatchBuilder<'a> {
    pool: &'a DbPool,
    batch_size: i64,
    user_id: Option<i64>,
    category_id: Option<i64>,
    error_limit: i32,
    next_check_expired: bool,
    without_disabled: bool,
}

impl<'a> BatchBuilder<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self {
            pool,
            batch_size: 0,
            user_id: None,
            category_id: None,
            error_limit: 0,
            next_check_expired: false,
            without_disabled: false,
        }
    }

    /// Maximum number of jobs. 0 means no limit.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_category_id(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Exclude feeds with at least `limit` consecutive errors. 0 disables the filter.
    pub fn with_error_limit(mut self, limit: i32) -> Self {
        self.error_limit = limit;
        self
    }

    /// Only feeds whose next check time has passed.
    pub fn with_next_check_expired(mut self) -> Self {
        self.next_check_expired = true;
        self
    }

    pub fn without_disabled_feeds(mut self) -> Self {
        self.without_disabled = true;
        self
    }

    /// Run the query, most overdue feeds first.
    pub async fn fetch_jobs(&self) -> Result<Vec<Job>> {
        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT user_id, id AS feed_id, feed_url FROM feeds WHERE 1 = 1");

        if let Some(user_id) = self.user_id {
            query.push(" AND user_id = ");
            query.push_bind(user_id);
        }
        if let Some(category_id) = self.category_id {
            query.push(" AND category_id = ");
            query.push_bind(category_id);
        }
        if self.error_limit > 0 {
            query.push(" AND parsing_error_count < ");
            query.push_bind(self.error_limit);
        }
        if self.next_check_expired {
            query.push(" AND next_check_at < ");
            query.push_bind(to_db(&Utc::now()));
        }
        if self.without_disabled {
            query.push(" AND disabled = 0");
        }
        query.push(" ORDER BY next_check_at ASC");
        if self.batch_size > 0 {
            query.push(" LIMIT ");
            query.push_bind(self.batch_size);
        }

        let jobs = query
            .build_query_as::<Job>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        debug!("Batch query selected {} feeds", jobs.len());
        Ok(jobs)
    }
}

/// Select due feeds and hand them to the worker pool.
///
/// Returns the number of jobs enqueued.
pub async fn enqueue_batch(builder: &BatchBuilder<'_>, workers: &WorkerPool) -> Result<usize> {
    let jobs = builder.fetch_jobs().await?;
    let count = jobs.len();
    if count == 0 {
        debug!("No feeds due for refresh");
        return Ok(0);
    }
    workers.push(jobs).await?;
    info!("Enqueued {} feeds for refresh", count);
    Ok(count)
}

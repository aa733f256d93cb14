//! Entry repository, including feed reconciliation.

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, SqliteConnection};
use tracing::{debug, warn};

use super::types::{Entry, EntryStatus, NewEntry};
use crate::datetime::{parse_datetime, to_db};
use crate::db::DbPool;
use crate::{FeedloomError, Result};

const WEEK_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    user_id: i64,
    feed_id: i64,
    hash: String,
    status: String,
    title: String,
    url: String,
    comments_url: String,
    author: String,
    content: String,
    published_at: String,
    created_at: String,
    changed_at: String,
    starred: bool,
    reading_time: i32,
    tags: String,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: row.id,
            user_id: row.user_id,
            feed_id: row.feed_id,
            hash: row.hash,
            status: row.status.parse().unwrap_or_default(),
            title: row.title,
            url: row.url,
            comments_url: row.comments_url,
            author: row.author,
            content: row.content,
            published_at: parse_datetime(&row.published_at).unwrap_or_else(Utc::now),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            changed_at: parse_datetime(&row.changed_at).unwrap_or_else(Utc::now),
            starred: row.starred,
            reading_time: row.reading_time,
            tags: serde_json::from_str(&row.tags).unwrap_or_default(),
        }
    }
}

const ENTRY_COLUMNS: &str = "id, user_id, feed_id, hash, status, title, url, comments_url, \
    author, content, published_at, created_at, changed_at, starred, reading_time, tags";

fn encode_tags(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags).map_err(|e| FeedloomError::Database(e.to_string()))
}

/// Repository for entry operations.
pub struct EntryRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> EntryRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Reconcile freshly parsed entries with the stored ones.
    ///
    /// Each entry is handled in its own transaction: unknown hashes are
    /// inserted as unread, known hashes are updated in place when
    /// `update_existing` is set. Afterwards, removed entries whose hash is no
    /// longer published are purged. Returns the newly inserted entries.
    pub async fn refresh_feed_entries(
        &self,
        user_id: i64,
        feed_id: i64,
        entries: &[NewEntry],
        update_existing: bool,
    ) -> Result<Vec<Entry>> {
        let mut created = Vec::new();
        let mut hashes = Vec::with_capacity(entries.len());

        for entry in entries {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| FeedloomError::Database(e.to_string()))?;

            if entry_exists(&mut *tx, feed_id, &entry.hash).await? {
                if update_existing {
                    update_entry(&mut *tx, user_id, feed_id, entry).await?;
                }
            } else {
                created.push(insert_entry(&mut *tx, user_id, feed_id, entry).await?);
            }

            tx.commit()
                .await
                .map_err(|e| FeedloomError::Database(e.to_string()))?;
            hashes.push(entry.hash.clone());
        }

        match self.delete_removed_entries_not_in(feed_id, &hashes).await {
            Ok(0) => {}
            Ok(purged) => debug!(feed_id, purged, "Purged removed entries"),
            Err(e) => warn!(feed_id, "Unable to purge removed entries: {}", e),
        }

        Ok(created)
    }

    pub async fn entry_exists(&self, feed_id: i64, hash: &str) -> Result<bool> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;
        entry_exists(&mut *conn, feed_id, hash).await
    }

    /// Delete removed entries of a feed whose hash is not in `hashes`.
    ///
    /// Unread and read entries are never deleted here.
    pub async fn delete_removed_entries_not_in(
        &self,
        feed_id: i64,
        hashes: &[String],
    ) -> Result<u64> {
        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("DELETE FROM entries WHERE feed_id = ");
        query.push_bind(feed_id);
        query.push(" AND status = ");
        query.push_bind(EntryStatus::Removed.as_str());
        if !hashes.is_empty() {
            query.push(" AND hash NOT IN (");
            let mut separated = query.separated(", ");
            for hash in hashes {
                separated.push_bind(hash);
            }
            separated.push_unseparated(")");
        }

        let result = query
            .build()
            .execute(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Estimated number of entries the feed publishes per week.
    ///
    /// Derived from the average spacing of entries published during the
    /// last seven days; 0 with fewer than two such entries.
    pub async fn weekly_entry_count(
        &self,
        user_id: i64,
        feed_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let since = to_db(&(now - Duration::days(7)));
        let (count, oldest, newest): (i64, Option<String>, Option<String>) = sqlx::query_as(
            "SELECT COUNT(*), MIN(published_at), MAX(published_at)
             FROM entries
             WHERE user_id = ? AND feed_id = ? AND published_at >= ?",
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(since)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        if count <= 1 {
            return Ok(0);
        }
        let (Some(oldest), Some(newest)) = (
            oldest.as_deref().and_then(parse_datetime),
            newest.as_deref().and_then(parse_datetime),
        ) else {
            return Ok(0);
        };

        let spread = (newest - oldest).num_seconds() as f64;
        if spread <= 0.0 {
            return Ok(0);
        }
        let average_gap = spread / (count - 1) as f64;
        Ok((WEEK_SECONDS / average_gap).ceil() as i64)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(Entry::from))
    }

    pub async fn get_by_hash(&self, feed_id: i64, hash: &str) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ? AND hash = ?"
        ))
        .bind(feed_id)
        .bind(hash)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(Entry::from))
    }

    /// All entries of a feed, newest first.
    pub async fn list_by_feed(&self, feed_id: i64) -> Result<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ?
             ORDER BY published_at DESC, id DESC"
        ))
        .bind(feed_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    pub async fn count_by_feed(&self, feed_id: i64, status: Option<EntryStatus>) -> Result<i64> {
        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM entries WHERE feed_id = ");
        query.push_bind(feed_id);
        if let Some(status) = status {
            query.push(" AND status = ");
            query.push_bind(status.as_str());
        }

        let count: i64 = query
            .build_query_scalar()
            .fetch_one(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(count)
    }

    /// Change the status of a user's entries.
    ///
    /// Removed entries are left untouched. Returns the number of entries changed.
    pub async fn set_entries_status(
        &self,
        user_id: i64,
        entry_ids: &[i64],
        status: EntryStatus,
    ) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE entries SET status = ");
        query.push_bind(status.as_str());
        query.push(", changed_at = ");
        query.push_bind(to_db(&Utc::now()));
        query.push(" WHERE user_id = ");
        query.push_bind(user_id);
        query.push(" AND status <> ");
        query.push_bind(EntryStatus::Removed.as_str());
        query.push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in entry_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = query
            .build()
            .execute(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    pub async fn set_entry_status(
        &self,
        user_id: i64,
        entry_id: i64,
        status: EntryStatus,
    ) -> Result<bool> {
        Ok(self
            .set_entries_status(user_id, &[entry_id], status)
            .await?
            > 0)
    }

    /// Flip the starred flag of an entry. Returns `false` if it does not exist.
    pub async fn toggle_starred(&self, user_id: i64, entry_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE entries SET starred = NOT starred WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(entry_id)
        .execute(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move entries with `status`, unstarred and older than `days`, to removed.
    ///
    /// At most `limit` entries are archived per call. Returns the count.
    pub async fn archive_entries(
        &self,
        status: EntryStatus,
        days: i64,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if days <= 0 || limit <= 0 || status == EntryStatus::Removed {
            return Ok(0);
        }

        let cutoff = to_db(&(now - Duration::days(days)));
        let result = sqlx::query(
            "UPDATE entries SET status = ?, changed_at = ?
             WHERE id IN (
                 SELECT id FROM entries
                 WHERE status = ? AND starred = 0 AND published_at < ?
                 ORDER BY published_at ASC
                 LIMIT ?
             )",
        )
        .bind(EntryStatus::Removed.as_str())
        .bind(to_db(&now))
        .bind(status.as_str())
        .bind(cutoff)
        .bind(limit)
        .execute(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

async fn entry_exists(conn: &mut SqliteConnection, feed_id: i64, hash: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM entries WHERE feed_id = ? AND hash = ?)")
            .bind(feed_id)
            .bind(hash)
            .fetch_one(conn)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

    Ok(exists)
}

async fn insert_entry(
    conn: &mut SqliteConnection,
    user_id: i64,
    feed_id: i64,
    entry: &NewEntry,
) -> Result<Entry> {
    let now = to_db(&Utc::now());
    let row = sqlx::query_as::<_, EntryRow>(&format!(
        r#"
        INSERT INTO entries (
            user_id, feed_id, hash, status, title, url, comments_url, author, content,
            published_at, created_at, changed_at, reading_time, tags
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {ENTRY_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(feed_id)
    .bind(&entry.hash)
    .bind(EntryStatus::Unread.as_str())
    .bind(&entry.title)
    .bind(&entry.url)
    .bind(&entry.comments_url)
    .bind(&entry.author)
    .bind(&entry.content)
    .bind(to_db(&entry.published_at))
    .bind(&now)
    .bind(&now)
    .bind(entry.reading_time)
    .bind(encode_tags(&entry.tags)?)
    .fetch_one(conn)
    .await
    .map_err(|e| FeedloomError::Database(e.to_string()))?;

    Ok(row.into())
}

/// Overwrite the content fields of a known entry. Status is never touched.
async fn update_entry(
    conn: &mut SqliteConnection,
    user_id: i64,
    feed_id: i64,
    entry: &NewEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE entries SET
            title = ?, url = ?, comments_url = ?, content = ?, author = ?,
            reading_time = ?, tags = ?
        WHERE user_id = ? AND feed_id = ? AND hash = ?
        "#,
    )
    .bind(&entry.title)
    .bind(&entry.url)
    .bind(&entry.comments_url)
    .bind(&entry.content)
    .bind(&entry.author)
    .bind(entry.reading_time)
    .bind(encode_tags(&entry.tags)?)
    .bind(user_id)
    .bind(feed_id)
    .bind(&entry.hash)
    .execute(conn)
    .await
    .map_err(|e| FeedloomError::Database(e.to_string()))?;

    Ok(())
}

//! Feed and icon repositories.

use chrono::Utc;
use sqlx::QueryBuilder;

use super::types::{Feed, FeedModificationRequest, Icon};
use crate::datetime::{parse_datetime, to_db};
use crate::db::DbPool;
use crate::{FeedloomError, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    user_id: i64,
    category_id: Option<i64>,
    feed_url: String,
    site_url: String,
    title: String,
    checked_at: Option<String>,
    next_check_at: String,
    etag_header: String,
    last_modified_header: String,
    parsing_error_msg: String,
    parsing_error_count: i32,
    scraper_rules: String,
    rewrite_rules: String,
    crawler: bool,
    blocklist_rules: String,
    keeplist_rules: String,
    block_filter_entry_rules: String,
    keep_filter_entry_rules: String,
    user_agent: String,
    cookie: String,
    username: String,
    password: String,
    disabled: bool,
    ignore_http_cache: bool,
    allow_self_signed_certificates: bool,
    fetch_via_proxy: bool,
    created_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            user_id: row.user_id,
            category_id: row.category_id,
            feed_url: row.feed_url,
            site_url: row.site_url,
            title: row.title,
            checked_at: row.checked_at.and_then(|s| parse_datetime(&s)),
            next_check_at: parse_datetime(&row.next_check_at).unwrap_or_else(Utc::now),
            etag_header: row.etag_header,
            last_modified_header: row.last_modified_header,
            parsing_error_msg: row.parsing_error_msg,
            parsing_error_count: row.parsing_error_count,
            scraper_rules: row.scraper_rules,
            rewrite_rules: row.rewrite_rules,
            crawler: row.crawler,
            blocklist_rules: row.blocklist_rules,
            keeplist_rules: row.keeplist_rules,
            block_filter_entry_rules: row.block_filter_entry_rules,
            keep_filter_entry_rules: row.keep_filter_entry_rules,
            user_agent: row.user_agent,
            cookie: row.cookie,
            username: row.username,
            password: row.password,
            disabled: row.disabled,
            ignore_http_cache: row.ignore_http_cache,
            allow_self_signed_certificates: row.allow_self_signed_certificates,
            fetch_via_proxy: row.fetch_via_proxy,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

const FEED_COLUMNS: &str = "id, user_id, category_id, feed_url, site_url, title, checked_at, \
    next_check_at, etag_header, last_modified_header, parsing_error_msg, parsing_error_count, \
    scraper_rules, rewrite_rules, crawler, blocklist_rules, keeplist_rules, \
    block_filter_entry_rules, keep_filter_entry_rules, user_agent, cookie, username, password, \
    disabled, ignore_http_cache, allow_self_signed_certificates, fetch_via_proxy, created_at";

/// Repository for feed operations.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a feed. The `id` of the argument is ignored.
    pub async fn create(&self, feed: &Feed) -> Result<Feed> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feeds (
                user_id, category_id, feed_url, site_url, title, checked_at, next_check_at,
                etag_header, last_modified_header, parsing_error_msg, parsing_error_count,
                scraper_rules, rewrite_rules, crawler, blocklist_rules, keeplist_rules,
                block_filter_entry_rules, keep_filter_entry_rules, user_agent, cookie,
                username, password, disabled, ignore_http_cache,
                allow_self_signed_certificates, fetch_via_proxy, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(feed.user_id)
        .bind(feed.category_id)
        .bind(&feed.feed_url)
        .bind(&feed.site_url)
        .bind(&feed.title)
        .bind(feed.checked_at.as_ref().map(to_db))
        .bind(to_db(&feed.next_check_at))
        .bind(&feed.etag_header)
        .bind(&feed.last_modified_header)
        .bind(&feed.parsing_error_msg)
        .bind(feed.parsing_error_count)
        .bind(&feed.scraper_rules)
        .bind(&feed.rewrite_rules)
        .bind(feed.crawler)
        .bind(&feed.blocklist_rules)
        .bind(&feed.keeplist_rules)
        .bind(&feed.block_filter_entry_rules)
        .bind(&feed.keep_filter_entry_rules)
        .bind(&feed.user_agent)
        .bind(&feed.cookie)
        .bind(&feed.username)
        .bind(&feed.password)
        .bind(feed.disabled)
        .bind(feed.ignore_http_cache)
        .bind(feed.allow_self_signed_certificates)
        .bind(feed.fetch_via_proxy)
        .bind(to_db(&feed.created_at))
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedloomError::NotFound("feed".to_string()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    /// Feed owned by `user_id`, or `None`.
    pub async fn get_by_user_and_id(&self, user_id: i64, id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = ? AND id = ?"
        ))
        .bind(user_id)
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = ? ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// True if the user subscribes to `feed_url`.
    pub async fn feed_url_exists(&self, user_id: i64, feed_url: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM feeds WHERE user_id = ? AND feed_url = ?)",
        )
        .bind(user_id)
        .bind(feed_url)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(exists)
    }

    /// True if a feed other than `feed_id` already uses `feed_url` for this user.
    pub async fn another_feed_url_exists(
        &self,
        user_id: i64,
        feed_id: i64,
        feed_url: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM feeds WHERE user_id = ? AND id <> ? AND feed_url = ?)",
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(feed_url)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(exists)
    }

    /// Persist every refresh-managed field of a feed after a successful refresh.
    pub async fn update(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                feed_url = ?, site_url = ?, title = ?, checked_at = ?, next_check_at = ?,
                etag_header = ?, last_modified_header = ?,
                parsing_error_msg = ?, parsing_error_count = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&feed.feed_url)
        .bind(&feed.site_url)
        .bind(&feed.title)
        .bind(feed.checked_at.as_ref().map(to_db))
        .bind(to_db(&feed.next_check_at))
        .bind(&feed.etag_header)
        .bind(&feed.last_modified_header)
        .bind(&feed.parsing_error_msg)
        .bind(feed.parsing_error_count)
        .bind(feed.id)
        .bind(feed.user_id)
        .execute(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(())
    }

    /// Persist `checked_at` and `next_check_at` ahead of a fetch.
    pub async fn update_schedule(&self, feed: &Feed) -> Result<()> {
        sqlx::query("UPDATE feeds SET checked_at = ?, next_check_at = ? WHERE id = ? AND user_id = ?")
            .bind(feed.checked_at.as_ref().map(to_db))
            .bind(to_db(&feed.next_check_at))
            .bind(feed.id)
            .bind(feed.user_id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(())
    }

    /// Persist only the failure bookkeeping of a feed.
    pub async fn update_error_state(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                parsing_error_msg = ?, parsing_error_count = ?, checked_at = ?, next_check_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&feed.parsing_error_msg)
        .bind(feed.parsing_error_count)
        .bind(feed.checked_at.as_ref().map(to_db))
        .bind(to_db(&feed.next_check_at))
        .bind(feed.id)
        .bind(feed.user_id)
        .execute(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(())
    }

    /// Apply user-editable changes. Returns `None` if the feed does not exist.
    pub async fn modify(
        &self,
        user_id: i64,
        id: i64,
        request: &FeedModificationRequest,
    ) -> Result<Option<Feed>> {
        if request.is_empty() {
            return self.get_by_user_and_id(user_id, id).await;
        }

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE feeds SET ");
        let mut separated = query.separated(", ");
        if let Some(ref title) = request.title {
            separated.push("title = ");
            separated.push_bind_unseparated(title);
        }
        if let Some(ref site_url) = request.site_url {
            separated.push("site_url = ");
            separated.push_bind_unseparated(site_url);
        }
        if let Some(category_id) = request.category_id {
            separated.push("category_id = ");
            separated.push_bind_unseparated(category_id);
        }
        if let Some(disabled) = request.disabled {
            separated.push("disabled = ");
            separated.push_bind_unseparated(disabled);
        }
        if let Some(crawler) = request.crawler {
            separated.push("crawler = ");
            separated.push_bind_unseparated(crawler);
        }
        if let Some(ignore) = request.ignore_http_cache {
            separated.push("ignore_http_cache = ");
            separated.push_bind_unseparated(ignore);
        }
        if let Some(proxy) = request.fetch_via_proxy {
            separated.push("fetch_via_proxy = ");
            separated.push_bind_unseparated(proxy);
        }
        if let Some(ref rules) = request.blocklist_rules {
            separated.push("blocklist_rules = ");
            separated.push_bind_unseparated(rules);
        }
        if let Some(ref rules) = request.keeplist_rules {
            separated.push("keeplist_rules = ");
            separated.push_bind_unseparated(rules);
        }
        if let Some(ref rules) = request.block_filter_entry_rules {
            separated.push("block_filter_entry_rules = ");
            separated.push_bind_unseparated(rules);
        }
        if let Some(ref rules) = request.keep_filter_entry_rules {
            separated.push("keep_filter_entry_rules = ");
            separated.push_bind_unseparated(rules);
        }
        query.push(" WHERE user_id = ");
        query.push_bind(user_id);
        query.push(" AND id = ");
        query.push_bind(id);

        let result = query
            .build()
            .execute(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_user_and_id(user_id, id).await
    }

    /// Clear the error state of every feed. Returns the number of feeds reset.
    pub async fn reset_all_errors(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE feeds SET parsing_error_count = 0, parsing_error_msg = ''
             WHERE parsing_error_count > 0",
        )
        .execute(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct IconRow {
    id: i64,
    hash: String,
    mime_type: String,
    content: Vec<u8>,
}

impl From<IconRow> for Icon {
    fn from(row: IconRow) -> Self {
        Icon {
            id: row.id,
            hash: row.hash,
            mime_type: row.mime_type,
            content: row.content,
        }
    }
}

/// Repository for feed icons.
pub struct IconRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> IconRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn has_icon(&self, feed_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM feed_icons WHERE feed_id = ?)")
                .bind(feed_id)
                .fetch_one(self.pool)
                .await
                .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(exists)
    }

    /// Store an icon (reusing an identical stored one) and attach it to a feed.
    pub async fn store_feed_icon(&self, feed_id: i64, icon: &Icon) -> Result<Icon> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        sqlx::query("INSERT OR IGNORE INTO icons (hash, mime_type, content) VALUES (?, ?, ?)")
            .bind(&icon.hash)
            .bind(&icon.mime_type)
            .bind(&icon.content)
            .execute(&mut *tx)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        let stored = sqlx::query_as::<_, IconRow>(
            "SELECT id, hash, mime_type, content FROM icons WHERE hash = ?",
        )
        .bind(&icon.hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        sqlx::query(
            "INSERT INTO feed_icons (feed_id, icon_id) VALUES (?, ?)
             ON CONFLICT (feed_id) DO UPDATE SET icon_id = excluded.icon_id",
        )
        .bind(feed_id)
        .bind(stored.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(stored.into())
    }

    pub async fn get_by_feed(&self, feed_id: i64) -> Result<Option<Icon>> {
        let row = sqlx::query_as::<_, IconRow>(
            "SELECT icons.id, icons.hash, icons.mime_type, icons.content
             FROM icons JOIN feed_icons ON feed_icons.icon_id = icons.id
             WHERE feed_icons.feed_id = ?",
        )
        .bind(feed_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(Icon::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewUser, UserRepository};
    use crate::feed::FeedCreationRequest;
    use chrono::{Duration, Utc};

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let user = UserRepository::new(db.pool())
            .create(&NewUser::new("alice"))
            .await
            .unwrap();
        (db, user.id)
    }

    fn new_feed(user_id: i64, url: &str) -> Feed {
        Feed::from_request(user_id, &FeedCreationRequest::new(url), Utc::now())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(db.pool());

        let mut feed = new_feed(user_id, "https://example.com/feed.xml");
        feed.title = "Example".to_string();
        feed.crawler = true;
        let created = repo.create(&feed).await.unwrap();

        assert!(created.id > 0);
        assert_eq!(created.title, "Example");
        assert!(created.crawler);
        assert!(created.checked_at.is_none());

        assert!(repo
            .get_by_user_and_id(user_id, created.id)
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .get_by_user_and_id(user_id + 1, created.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_url_per_user_rejected() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(db.pool());
        repo.create(&new_feed(user_id, "https://example.com/feed.xml"))
            .await
            .unwrap();
        assert!(repo
            .create(&new_feed(user_id, "https://example.com/feed.xml"))
            .await
            .is_err());
        assert!(repo
            .feed_url_exists(user_id, "https://example.com/feed.xml")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_another_feed_url_exists() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(db.pool());
        let a = repo
            .create(&new_feed(user_id, "https://a.example.com/feed"))
            .await
            .unwrap();
        let b = repo
            .create(&new_feed(user_id, "https://b.example.com/feed"))
            .await
            .unwrap();

        assert!(!repo
            .another_feed_url_exists(user_id, a.id, "https://a.example.com/feed")
            .await
            .unwrap());
        assert!(repo
            .another_feed_url_exists(user_id, b.id, "https://a.example.com/feed")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_error_state_and_reset() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(db.pool());
        let mut feed = repo
            .create(&new_feed(user_id, "https://example.com/feed.xml"))
            .await
            .unwrap();

        let now = Utc::now();
        feed.checked_now(now);
        feed.record_error("boom");
        feed.next_check_at = now + Duration::hours(1);
        repo.update_error_state(&feed).await.unwrap();

        let stored = repo.get_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.parsing_error_count, 1);
        assert_eq!(stored.parsing_error_msg, "boom");
        assert_eq!(stored.next_check_at, feed.next_check_at);
        assert_eq!(stored.checked_at, Some(now));

        assert_eq!(repo.reset_all_errors().await.unwrap(), 1);
        let stored = repo.get_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.parsing_error_count, 0);
        assert!(stored.parsing_error_msg.is_empty());
    }

    #[tokio::test]
    async fn test_update_schedule_leaves_other_fields() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(db.pool());
        let mut feed = repo
            .create(&new_feed(user_id, "https://example.com/feed.xml"))
            .await
            .unwrap();

        let now = Utc::now();
        feed.checked_now(now);
        feed.next_check_at = now + Duration::hours(2);
        feed.title = "unsaved".to_string();
        repo.update_schedule(&feed).await.unwrap();

        let stored = repo.get_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.checked_at, Some(now));
        assert_eq!(stored.next_check_at, feed.next_check_at);
        assert_ne!(stored.title, "unsaved");
    }

    #[tokio::test]
    async fn test_modify() {
        let (db, user_id) = setup().await;
        let repo = FeedRepository::new(db.pool());
        let feed = repo
            .create(&new_feed(user_id, "https://example.com/feed.xml"))
            .await
            .unwrap();

        let modified = repo
            .modify(
                user_id,
                feed.id,
                &FeedModificationRequest::new()
                    .disabled(true)
                    .block_rules("EntryTitle=ad"),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(modified.disabled);
        assert_eq!(modified.block_filter_entry_rules, "EntryTitle=ad");

        let other_user = repo
            .modify(user_id + 1, feed.id, &FeedModificationRequest::new().disabled(false))
            .await
            .unwrap();
        assert!(other_user.is_none());
    }

    #[tokio::test]
    async fn test_store_feed_icon_deduplicates() {
        let (db, user_id) = setup().await;
        let feeds = FeedRepository::new(db.pool());
        let a = feeds
            .create(&new_feed(user_id, "https://a.example.com/feed"))
            .await
            .unwrap();
        let b = feeds
            .create(&new_feed(user_id, "https://b.example.com/feed"))
            .await
            .unwrap();

        let icons = IconRepository::new(db.pool());
        assert!(!icons.has_icon(a.id).await.unwrap());

        let icon = Icon::from_content("image/png", vec![0x89, 0x50, 0x4e, 0x47]);
        let first = icons.store_feed_icon(a.id, &icon).await.unwrap();
        let second = icons.store_feed_icon(b.id, &icon).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(icons.has_icon(a.id).await.unwrap());
        assert_eq!(icons.get_by_feed(b.id).await.unwrap(), Some(first));
    }
}

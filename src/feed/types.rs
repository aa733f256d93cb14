//! Feed types.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::scheduler::NextCheck;

/// A subscription of one user to one feed URL.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub category_id: Option<i64>,
    pub feed_url: String,
    pub site_url: String,
    pub title: String,
    pub checked_at: Option<DateTime<Utc>>,
    pub next_check_at: DateTime<Utc>,
    pub etag_header: String,
    pub last_modified_header: String,
    /// Localized message of the last refresh failure. Empty when healthy.
    pub parsing_error_msg: String,
    /// Consecutive failed refreshes.
    pub parsing_error_count: i32,
    pub scraper_rules: String,
    pub rewrite_rules: String,
    /// When set, refreshes never overwrite entries that already exist.
    pub crawler: bool,
    /// Legacy block rule: one regex tested against entry URL, title, author and tags.
    pub blocklist_rules: String,
    /// Legacy keep rule, same shape as `blocklist_rules`.
    pub keeplist_rules: String,
    pub block_filter_entry_rules: String,
    pub keep_filter_entry_rules: String,
    pub user_agent: String,
    pub cookie: String,
    pub username: String,
    pub password: String,
    pub disabled: bool,
    pub ignore_http_cache: bool,
    pub allow_self_signed_certificates: bool,
    pub fetch_via_proxy: bool,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// Unsaved feed carrying the settings of a creation request.
    pub fn from_request(user_id: i64, request: &FeedCreationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            category_id: request.category_id,
            feed_url: request.feed_url.clone(),
            site_url: String::new(),
            title: String::new(),
            checked_at: None,
            next_check_at: now,
            etag_header: String::new(),
            last_modified_header: String::new(),
            parsing_error_msg: String::new(),
            parsing_error_count: 0,
            scraper_rules: request.scraper_rules.clone(),
            rewrite_rules: request.rewrite_rules.clone(),
            crawler: request.crawler,
            blocklist_rules: request.blocklist_rules.clone(),
            keeplist_rules: request.keeplist_rules.clone(),
            block_filter_entry_rules: request.block_filter_entry_rules.clone(),
            keep_filter_entry_rules: request.keep_filter_entry_rules.clone(),
            user_agent: request.user_agent.clone(),
            cookie: request.cookie.clone(),
            username: request.username.clone(),
            password: request.password.clone(),
            disabled: request.disabled,
            ignore_http_cache: request.ignore_http_cache,
            allow_self_signed_certificates: request.allow_self_signed_certificates,
            fetch_via_proxy: request.fetch_via_proxy,
            created_at: now,
        }
    }

    /// Mark the feed as checked at `now`.
    ///
    /// An empty site URL falls back to the feed URL.
    pub fn checked_now(&mut self, now: DateTime<Utc>) {
        self.checked_at = Some(now);
        if self.site_url.is_empty() {
            self.site_url = self.feed_url.clone();
        }
    }

    pub fn schedule(&mut self, next: NextCheck) {
        self.next_check_at = next.next_check_at;
    }

    /// Record one more failure with its localized message.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.parsing_error_msg = message.into();
        self.parsing_error_count += 1;
    }

    pub fn reset_error_counter(&mut self) {
        self.parsing_error_msg.clear();
        self.parsing_error_count = 0;
    }

    pub fn has_error(&self) -> bool {
        self.parsing_error_count > 0
    }
}

/// Parameters for subscribing a user to a new feed.
#[derive(Debug, Clone, Default)]
pub struct FeedCreationRequest {
    pub feed_url: String,
    pub category_id: Option<i64>,
    pub user_agent: String,
    pub cookie: String,
    pub username: String,
    pub password: String,
    pub crawler: bool,
    pub disabled: bool,
    pub ignore_http_cache: bool,
    pub allow_self_signed_certificates: bool,
    pub fetch_via_proxy: bool,
    pub scraper_rules: String,
    pub rewrite_rules: String,
    pub blocklist_rules: String,
    pub keeplist_rules: String,
    pub block_filter_entry_rules: String,
    pub keep_filter_entry_rules: String,
}

impl FeedCreationRequest {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_block_rules(mut self, rules: impl Into<String>) -> Self {
        self.block_filter_entry_rules = rules.into();
        self
    }

    pub fn with_keep_rules(mut self, rules: impl Into<String>) -> Self {
        self.keep_filter_entry_rules = rules.into();
        self
    }

    pub fn with_crawler(mut self, crawler: bool) -> Self {
        self.crawler = crawler;
        self
    }
}

/// Changes to a feed's user-editable settings. Unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct FeedModificationRequest {
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub category_id: Option<Option<i64>>,
    pub disabled: Option<bool>,
    pub crawler: Option<bool>,
    pub ignore_http_cache: Option<bool>,
    pub fetch_via_proxy: Option<bool>,
    pub blocklist_rules: Option<String>,
    pub keeplist_rules: Option<String>,
    pub block_filter_entry_rules: Option<String>,
    pub keep_filter_entry_rules: Option<String>,
}

impl FeedModificationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    pub fn crawler(mut self, crawler: bool) -> Self {
        self.crawler = Some(crawler);
        self
    }

    pub fn ignore_http_cache(mut self, ignore: bool) -> Self {
        self.ignore_http_cache = Some(ignore);
        self
    }

    pub fn block_rules(mut self, rules: impl Into<String>) -> Self {
        self.block_filter_entry_rules = Some(rules.into());
        self
    }

    pub fn keep_rules(mut self, rules: impl Into<String>) -> Self {
        self.keep_filter_entry_rules = Some(rules.into());
        self
    }

    pub fn blocklist(mut self, regex: impl Into<String>) -> Self {
        self.blocklist_rules = Some(regex.into());
        self
    }

    pub fn keeplist(mut self, regex: impl Into<String>) -> Self {
        self.keeplist_rules = Some(regex.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.site_url.is_none()
            && self.category_id.is_none()
            && self.disabled.is_none()
            && self.crawler.is_none()
            && self.ignore_http_cache.is_none()
            && self.fetch_via_proxy.is_none()
            && self.blocklist_rules.is_none()
            && self.keeplist_rules.is_none()
            && self.block_filter_entry_rules.is_none()
            && self.keep_filter_entry_rules.is_none()
    }
}

/// A stored feed icon, deduplicated by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub id: i64,
    pub hash: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl Icon {
    /// Build an unsaved icon from downloaded bytes.
    pub fn from_content(mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        let hash = hex::encode(Sha256::digest(&content));
        Self {
            id: 0,
            hash,
            mime_type: mime_type.into(),
            content,
        }
    }
}

//! Feed creation and the per-feed refresh pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::fetcher::{FetchResponse, Fetcher, RequestOptions};
use super::filter::{validate_legacy_rule, validate_rules, EntryFilter};
use super::icon::IconFinder;
use super::parser::{parse_feed, ParsedFeed};
use crate::db::{CategoryRepository, Database, User, UserRepository};
use crate::entry::{EntryRepository, NewEntry};
use crate::error::FetchError;
use crate::feed::{Feed, FeedCreationRequest, FeedRepository, IconRepository};
use crate::i18n::I18nManager;
use crate::integration::IntegrationDispatcher;
use crate::scheduler::{compute_next_check, PollingScheduler, SchedulerConfig};
use crate::{FeedloomError, Result};

/// Default delay applied after a 429 without `Retry-After`, in minutes.
pub const DEFAULT_RATE_LIMITED_BACKOFF_MINUTES: i64 = 720;

/// Outcome of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub feed_id: i64,
    /// The server reported no change and no entry was touched.
    pub not_modified: bool,
    /// Entries inserted by this refresh.
    pub new_entries: usize,
    /// Parsed entries rejected by the filter rules.
    pub filtered_entries: usize,
    pub next_check_at: DateTime<Utc>,
}

/// Drives fetching, parsing, filtering and reconciliation of feeds.
pub struct FeedHandler {
    db: Database,
    fetcher: Arc<dyn Fetcher>,
    icons: IconFinder,
    scheduler: SchedulerConfig,
    rate_limited_backoff_minutes: i64,
    i18n: Arc<I18nManager>,
    dispatcher: Option<IntegrationDispatcher>,
    in_flight: Mutex<HashSet<i64>>,
}

/// Marks a feed as being refreshed until dropped.
struct InFlight<'a> {
    feeds: &'a Mutex<HashSet<i64>>,
    feed_id: i64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.feed_id);
    }
}

impl FeedHandler {
    pub fn new(
        db: Database,
        fetcher: Arc<dyn Fetcher>,
        scheduler: SchedulerConfig,
        i18n: Arc<I18nManager>,
    ) -> Self {
        Self {
            db,
            icons: IconFinder::new(fetcher.clone()),
            fetcher,
            scheduler,
            rate_limited_backoff_minutes: DEFAULT_RATE_LIMITED_BACKOFF_MINUTES,
            i18n,
            dispatcher: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_rate_limited_backoff(mut self, minutes: i64) -> Self {
        self.rate_limited_backoff_minutes = minutes;
        self
    }

    /// Hand new entries to the integrations.
    pub fn with_dispatcher(mut self, dispatcher: IntegrationDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    /// True while a refresh of the feed is running.
    pub fn is_refreshing(&self, feed_id: i64) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&feed_id)
    }

    fn begin_refresh(&self, feed_id: i64) -> Result<InFlight<'_>> {
        let mut feeds = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !feeds.insert(feed_id) {
            return Err(FeedloomError::RefreshInProgress(feed_id));
        }
        Ok(InFlight {
            feeds: &self.in_flight,
            feed_id,
        })
    }

    /// Subscribe a user to a feed.
    ///
    /// The URL is fetched and parsed first; the stored feed URL is the
    /// effective URL after redirects. Initial entries go through the same
    /// filter and reconciliation as a refresh.
    pub async fn create_feed(&self, user_id: i64, request: &FeedCreationRequest) -> Result<Feed> {
        let pool = self.db.pool();
        let user = UserRepository::new(pool)
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| FeedloomError::NotFound("user".to_string()))?;

        if let Some(category_id) = request.category_id {
            if !CategoryRepository::new(pool)
                .exists(user_id, category_id)
                .await?
            {
                return Err(FeedloomError::CategoryNotFound);
            }
        }

        validate_rules(&request.block_filter_entry_rules)?;
        validate_rules(&request.keep_filter_entry_rules)?;
        validate_legacy_rule(&request.blocklist_rules)?;
        validate_legacy_rule(&request.keeplist_rules)?;

        let feeds = FeedRepository::new(pool);
        if feeds.feed_url_exists(user_id, &request.feed_url).await? {
            return Err(FeedloomError::DuplicateFeed);
        }

        let now = Utc::now();
        let mut feed = Feed::from_request(user_id, request, now);
        let options = RequestOptions::for_feed(&feed);
        let response = self.fetcher.fetch(&request.feed_url, &options).await?;

        if response.effective_url != request.feed_url
            && feeds.feed_url_exists(user_id, &response.effective_url).await?
        {
            return Err(FeedloomError::DuplicateFeed);
        }

        let parsed = parse_feed(&response.effective_url, &response.body)?;
        feed.feed_url = response.effective_url.clone();
        feed.site_url = parsed.site_url.clone();
        feed.title = parsed.title.clone();
        feed.etag_header = response.etag.clone();
        feed.last_modified_header = response.last_modified.clone();
        feed.checked_now(now);

        let mut feed = feeds.create(&feed).await?;
        debug!(user_id, feed_id = feed.id, "Feed saved");

        let filter = EntryFilter::new(&user, &feed);
        let (admitted, _) = admit_entries(&filter, parsed.entries, now);
        let created = EntryRepository::new(pool)
            .refresh_feed_entries(user_id, feed.id, &admitted, true)
            .await?;

        let weekly = self.weekly_entry_count(user_id, feed.id, now).await?;
        let hint = refresh_hint(&response, parsed.ttl_minutes);
        feed.schedule(compute_next_check(&self.scheduler, now, weekly, hint));
        feeds.update(&feed).await?;

        self.dispatch(&feed, created);
        self.check_icon(&feed, parsed.icon_url.as_deref(), &options)
            .await;

        info!(
            user_id,
            feed_id = feed.id,
            feed_url = %feed.feed_url,
            "Feed created"
        );
        Ok(feed)
    }

    /// Refresh one feed.
    ///
    /// Failures are recorded on the feed (localized message, error counter)
    /// and returned. `force_refresh` bypasses HTTP caching and overwrites
    /// existing entries even for crawler feeds.
    pub async fn refresh_feed(
        &self,
        user_id: i64,
        feed_id: i64,
        force_refresh: bool,
    ) -> Result<RefreshSummary> {
        let _in_flight = self.begin_refresh(feed_id)?;
        let pool = self.db.pool();

        let user = UserRepository::new(pool)
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| FeedloomError::NotFound("user".to_string()))?;
        let feeds = FeedRepository::new(pool);
        let mut feed = feeds
            .get_by_user_and_id(user_id, feed_id)
            .await?
            .ok_or_else(|| FeedloomError::NotFound("feed".to_string()))?;

        let now = Utc::now();
        let weekly = self.weekly_entry_count(user_id, feed_id, now).await?;

        feed.checked_now(now);
        feed.schedule(compute_next_check(&self.scheduler, now, weekly, None));
        if let Err(e) = feeds.update_schedule(&feed).await {
            return Err(self.record_error(&user, &mut feed, e).await);
        }

        match self
            .fetch_and_store(&user, &mut feed, weekly, now, force_refresh)
            .await
        {
            Ok(summary) => {
                feed.reset_error_counter();
                if let Err(e) = feeds.update(&feed).await {
                    return Err(self.record_error(&user, &mut feed, e).await);
                }
                Ok(RefreshSummary {
                    next_check_at: feed.next_check_at,
                    ..summary
                })
            }
            Err(e) => Err(self.record_error(&user, &mut feed, e).await),
        }
    }

    async fn fetch_and_store(
        &self,
        user: &User,
        feed: &mut Feed,
        weekly: i64,
        now: DateTime<Utc>,
        force_refresh: bool,
    ) -> Result<RefreshSummary> {
        let pool = self.db.pool();
        let mut options = RequestOptions::for_feed(feed);
        options.ignore_http_cache |= force_refresh;

        let response = match self.fetcher.fetch(&feed.feed_url, &options).await {
            Ok(response) => response,
            Err(FetchError::TooManyRequests {
                retry_after_minutes,
            }) => {
                let backoff = retry_after_minutes.unwrap_or(self.rate_limited_backoff_minutes);
                feed.schedule(compute_next_check(
                    &self.scheduler,
                    now,
                    weekly,
                    Some(backoff),
                ));
                return Err(FetchError::TooManyRequests {
                    retry_after_minutes,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        if FeedRepository::new(pool)
            .another_feed_url_exists(user.id, feed.id, &response.effective_url)
            .await?
        {
            return Err(FeedloomError::DuplicateFeed);
        }

        let mut summary = RefreshSummary {
            feed_id: feed.id,
            not_modified: false,
            new_entries: 0,
            filtered_entries: 0,
            next_check_at: feed.next_check_at,
        };

        if response.not_modified && !options.ignore_http_cache {
            debug!(feed_id = feed.id, "Feed not modified");
            if let Some(hint) = response.refresh_hint_minutes {
                feed.schedule(compute_next_check(&self.scheduler, now, weekly, Some(hint)));
            }
            summary.not_modified = true;
            return Ok(summary);
        }

        let parsed: ParsedFeed = parse_feed(&response.effective_url, &response.body)?;
        if feed.title.is_empty() {
            feed.title = parsed.title.clone();
        }

        let filter = EntryFilter::new(user, feed);
        let (admitted, filtered) = admit_entries(&filter, parsed.entries, now);
        summary.filtered_entries = filtered;

        // Crawled content is authoritative unless the refresh is forced.
        let update_existing = force_refresh || !feed.crawler;
        let created = EntryRepository::new(pool)
            .refresh_feed_entries(user.id, feed.id, &admitted, update_existing)
            .await?;
        summary.new_entries = created.len();

        if let Some(hint) = refresh_hint(&response, parsed.ttl_minutes) {
            feed.schedule(compute_next_check(&self.scheduler, now, weekly, Some(hint)));
        }

        // A 304 may omit validators, so they only change on a full response.
        feed.etag_header = response.etag.clone();
        feed.last_modified_header = response.last_modified.clone();

        self.check_icon(feed, parsed.icon_url.as_deref(), &options)
            .await;
        self.dispatch(feed, created);

        if summary.new_entries > 0 {
            info!(
                feed_id = feed.id,
                "Feed refreshed: {} new entries, {} filtered", summary.new_entries, filtered
            );
        } else {
            debug!(feed_id = feed.id, "Feed refreshed: no new entries");
        }
        Ok(summary)
    }

    /// Store the failure on the feed and hand the error back.
    async fn record_error(&self, user: &User, feed: &mut Feed, e: FeedloomError) -> FeedloomError {
        let message = e.localize(&self.i18n.get(&user.language));
        warn!(
            feed_id = feed.id,
            feed_url = %feed.feed_url,
            "Refresh failed: {}",
            e
        );
        feed.record_error(message);
        if let Err(store_err) = FeedRepository::new(self.db.pool())
            .update_error_state(feed)
            .await
        {
            error!(feed_id = feed.id, "Unable to record feed error: {}", store_err);
        }
        e
    }

    async fn weekly_entry_count(&self, user_id: i64, feed_id: i64, now: DateTime<Utc>) -> Result<i64> {
        if self.scheduler.strategy != PollingScheduler::EntryFrequency {
            return Ok(0);
        }
        EntryRepository::new(self.db.pool())
            .weekly_entry_count(user_id, feed_id, now)
            .await
    }

    fn dispatch(&self, feed: &Feed, created: Vec<crate::entry::Entry>) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(feed, created);
        }
    }

    /// Look for an icon when the feed has none. Never fails the refresh.
    async fn check_icon(&self, feed: &Feed, icon_url: Option<&str>, options: &RequestOptions) {
        let icons = IconRepository::new(self.db.pool());
        match icons.has_icon(feed.id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                debug!(feed_id = feed.id, "Unable to check feed icon: {}", e);
                return;
            }
        }

        let Some(icon) = self.icons.find(&feed.site_url, icon_url, options).await else {
            debug!(feed_id = feed.id, site_url = %feed.site_url, "No icon found");
            return;
        };
        if let Err(e) = icons.store_feed_icon(feed.id, &icon).await {
            debug!(feed_id = feed.id, "Unable to store feed icon: {}", e);
        }
    }
}

/// Split parsed entries into admitted ones and a count of rejected ones.
fn admit_entries(
    filter: &EntryFilter,
    entries: Vec<NewEntry>,
    now: DateTime<Utc>,
) -> (Vec<NewEntry>, usize) {
    let total = entries.len();
    let admitted: Vec<NewEntry> = entries
        .into_iter()
        .filter(|entry| filter.admits(entry, now))
        .collect();
    let rejected = total - admitted.len();
    (admitted, rejected)
}

/// Largest delay requested by the response headers or the feed's TTL.
fn refresh_hint(response: &FetchResponse, ttl_minutes: Option<i64>) -> Option<i64> {
    response.refresh_hint_minutes.max(ttl_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_hint_prefers_largest() {
        let mut response = FetchResponse::ok("https://example.com/", b"x".to_vec());
        assert_eq!(refresh_hint(&response, None), None);
        assert_eq!(refresh_hint(&response, Some(30)), Some(30));
        response.refresh_hint_minutes = Some(90);
        assert_eq!(refresh_hint(&response, Some(30)), Some(90));
        assert_eq!(refresh_hint(&response, Some(120)), Some(120));
    }

    #[test]
    fn test_admit_entries_counts_rejections() {
        let filter = EntryFilter::default();
        let entries = vec![NewEntry::default(), NewEntry::default()];
        let (admitted, rejected) = admit_entries(&filter, entries, Utc::now());
        assert_eq!(admitted.len(), 2);
        assert_eq!(rejected, 0);
    }
}

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use feedloom::reader::{FetchResponse, RequestOptions};
use feedloom::{
    Database, Feed, FeedCreationRequest, FeedHandler, FeedRepository, FetchError, Fetcher,
    I18nManager, NewUser, SchedulerConfig, User, UserRepository,
};

pub const FEED_URL: &str = "https://example.com/feed.xml";

/// Fetcher answering from a script, one queue of responses per URL.
///
/// The last scripted response of a URL is repeated once the queue is down
/// to one element. Unscripted URLs answer 404.
#[derive(Default)]
pub struct MockFetcher {
    script: Mutex<HashMap<String, VecDeque<Result<FetchResponse, FetchError>>>>,
    requests: Mutex<Vec<(String, RequestOptions)>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, response: Result<FetchResponse, FetchError>) {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn respond_ok(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.respond(url, Ok(FetchResponse::ok(url, body)));
    }

    /// Requests made for `url`, in order.
    pub fn requests_for(&self, url: &str) -> Vec<RequestOptions> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, options)| options.clone())
            .collect()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<FetchResponse, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), options.clone()));

        let mut script = self.script.lock().unwrap();
        match script.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => Err(FetchError::ResourceNotFound(404)),
        }
    }
}

/// A 304 answer for `url`.
pub fn not_modified(url: &str) -> FetchResponse {
    FetchResponse {
        status: 304,
        effective_url: url.to_string(),
        not_modified: true,
        ..Default::default()
    }
}

/// One `<item>` of an RSS document.
pub struct Item {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub categories: Vec<String>,
    pub pub_date: Option<String>,
}

impl Item {
    pub fn new(guid: &str) -> Self {
        Self {
            guid: guid.to_string(),
            title: format!("Post {guid}"),
            link: format!("https://example.com/posts/{guid}"),
            categories: Vec::new(),
            pub_date: None,
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.categories.push(category.to_string());
        self
    }

    pub fn pub_date(mut self, date: &str) -> Self {
        self.pub_date = Some(date.to_string());
        self
    }
}

/// An RSS 2.0 document with the given items.
pub fn rss(title: &str, items: &[Item]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
<title>{title}</title>
<link>https://example.com/</link>
<description>Test feed</description>
"#
    );
    for item in items {
        xml.push_str("<item>\n");
        xml.push_str(&format!("<guid>{}</guid>\n", item.guid));
        xml.push_str(&format!("<title>{}</title>\n", item.title));
        xml.push_str(&format!("<link>{}</link>\n", item.link));
        xml.push_str(&format!(
            "<description>Content of {}</description>\n",
            item.guid
        ));
        for category in &item.categories {
            xml.push_str(&format!("<category>{category}</category>\n"));
        }
        if let Some(date) = &item.pub_date {
            xml.push_str(&format!("<pubDate>{date}</pubDate>\n"));
        }
        xml.push_str("</item>\n");
    }
    xml.push_str("</channel>\n</rss>\n");
    xml
}

pub fn rss_items(guids: &[&str]) -> String {
    let items: Vec<Item> = guids.iter().map(|g| Item::new(g)).collect();
    rss("Example", &items)
}

/// Test environment around an in-memory database.
pub struct TestEnv {
    pub db: Database,
    pub fetcher: Arc<MockFetcher>,
    pub handler: Arc<FeedHandler>,
    pub user: User,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_scheduler(SchedulerConfig::default()).await
    }

    pub async fn with_scheduler(scheduler: SchedulerConfig) -> Self {
        Self::build(scheduler, NewUser::new("alice")).await
    }

    pub async fn with_user(user: NewUser) -> Self {
        Self::build(SchedulerConfig::default(), user).await
    }

    async fn build(scheduler: SchedulerConfig, user: NewUser) -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let user = UserRepository::new(db.pool()).create(&user).await.unwrap();
        let fetcher = MockFetcher::new();
        let i18n = Arc::new(I18nManager::embedded("en").unwrap());
        let handler = Arc::new(FeedHandler::new(
            db.clone(),
            fetcher.clone(),
            scheduler,
            i18n,
        ));
        Self {
            db,
            fetcher,
            handler,
            user,
        }
    }

    /// Insert a feed directly, due for a check.
    pub async fn insert_feed(&self, request: &FeedCreationRequest) -> Feed {
        let mut feed = Feed::from_request(self.user.id, request, Utc::now());
        feed.next_check_at = Utc::now() - Duration::minutes(30);
        FeedRepository::new(self.db.pool())
            .create(&feed)
            .await
            .unwrap()
    }

    pub async fn reload(&self, feed: &Feed) -> Feed {
        FeedRepository::new(self.db.pool())
            .get_by_id(feed.id)
            .await
            .unwrap()
            .unwrap()
    }
}

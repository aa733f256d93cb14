//! Outbound pushes of newly stored entries.
//!
//! The refresh pipeline hands new entries to an [`IntegrationDispatcher`],
//! which queues them for a dedicated task. A full queue drops the batch; the
//! pipeline never waits on a third-party service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::Entry;
use crate::feed::Feed;
use crate::{FeedloomError, Result};

/// The feed a batch of entries belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub feed_url: String,
    pub site_url: String,
}

impl From<&Feed> for FeedSummary {
    fn from(feed: &Feed) -> Self {
        Self {
            id: feed.id,
            user_id: feed.user_id,
            title: feed.title.clone(),
            feed_url: feed.feed_url.clone(),
            site_url: feed.site_url.clone(),
        }
    }
}

/// New entries of one feed refresh.
#[derive(Debug, Clone, Serialize)]
pub struct EntryBatch {
    pub feed: FeedSummary,
    pub entries: Vec<Entry>,
}

/// A destination for new entries.
#[async_trait]
pub trait Integration: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, batch: &EntryBatch) -> Result<()>;
}

/// Queue in front of the configured integrations.
#[derive(Clone)]
pub struct IntegrationDispatcher {
    sender: mpsc::Sender<EntryBatch>,
}

impl IntegrationDispatcher {
    /// Start the delivery task. It ends once every dispatcher clone is dropped.
    pub fn spawn(
        integrations: Vec<Arc<dyn Integration>>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<EntryBatch>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(batch) = receiver.recv().await {
                for integration in &integrations {
                    match integration.push(&batch).await {
                        Ok(()) => debug!(
                            integration = integration.name(),
                            feed_id = batch.feed.id,
                            entries = batch.entries.len(),
                            "Pushed entries"
                        ),
                        Err(e) => warn!(
                            integration = integration.name(),
                            feed_id = batch.feed.id,
                            "Integration push failed: {}",
                            e
                        ),
                    }
                }
            }
            info!("Integration dispatcher stopped");
        });

        (Self { sender }, handle)
    }

    /// Queue new entries without waiting. Returns false when the batch was dropped.
    pub fn dispatch(&self, feed: &Feed, entries: Vec<Entry>) -> bool {
        if entries.is_empty() {
            return true;
        }
        let batch = EntryBatch {
            feed: FeedSummary::from(feed),
            entries,
        };
        match self.sender.try_send(batch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(batch)) => {
                warn!(
                    feed_id = batch.feed.id,
                    entries = batch.entries.len(),
                    "Integration queue full, dropping entries"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(feed_id = feed.id, "Integration dispatcher is closed");
                false
            }
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event_type: &'static str,
    feed: &'a FeedSummary,
    entries: &'a [Entry],
}

/// POSTs each batch as JSON to a fixed URL.
pub struct WebhookIntegration {
    client: reqwest::Client,
    url: String,
    user_agent: String,
}

impl WebhookIntegration {
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedloomError::Integration(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            user_agent: user_agent.into(),
        })
    }
}

#[async_trait]
impl Integration for WebhookIntegration {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn push(&self, batch: &EntryBatch) -> Result<()> {
        let body = serde_json::to_vec(&WebhookPayload {
            event_type: "new_entries",
            feed: &batch.feed,
            entries: &batch.entries,
        })
        .map_err(|e| FeedloomError::Integration(e.to_string()))?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .body(body)
            .send()
            .await
            .map_err(|e| FeedloomError::Integration(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedloomError::Integration(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

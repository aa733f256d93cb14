//! Entry types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::FeedloomError;

/// Lifecycle state of an entry.
///
/// `Removed` is terminal: once removed, an entry is never shown again and its
/// status is never changed back, even when the feed still publishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Unread,
    Read,
    Removed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Unread => "unread",
            EntryStatus::Read => "read",
            EntryStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = FeedloomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(EntryStatus::Unread),
            "read" => Ok(EntryStatus::Read),
            "removed" => Ok(EntryStatus::Removed),
            _ => Err(FeedloomError::Validation(format!("unknown entry status: {s}"))),
        }
    }
}

/// A stored article, unique per `(feed_id, hash)`.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub hash: String,
    pub status: EntryStatus,
    pub title: String,
    pub url: String,
    pub comments_url: String,
    pub author: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
    pub starred: bool,
    /// Estimated reading time in minutes.
    pub reading_time: i32,
    pub tags: Vec<String>,
}

/// An entry as parsed from a fetched document, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEntry {
    /// Content hash identifying the entry within its feed.
    pub hash: String,
    pub title: String,
    pub url: String,
    pub comments_url: String,
    pub author: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub reading_time: i32,
    pub tags: Vec<String>,
}

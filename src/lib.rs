//! feedloom - feed ingestion and scheduling engine
//!
//! Polls RSS, Atom and JSON feeds on behalf of many users, filters and
//! deduplicates their entries into SQLite, and schedules the next check of
//! every feed from its publishing rate and the server's caching hints.

pub mod config;
pub mod daemon;
pub mod datetime;
pub mod db;
pub mod entry;
pub mod error;
pub mod feed;
pub mod i18n;
pub mod integration;
pub mod logging;
pub mod reader;
pub mod scheduler;
pub mod worker;

pub use config::Config;
pub use daemon::{shutdown_signal, CleanupReport, Daemon};
pub use db::{Category, Database, NewUser, User, UserRepository, UserUpdate};
pub use entry::{Entry, EntryRepository, EntryStatus, NewEntry};
pub use error::{FeedloomError, FetchError, Result};
pub use feed::{Feed, FeedCreationRequest, FeedModificationRequest, FeedRepository};
pub use i18n::{I18n, I18nManager};
pub use integration::{Integration, IntegrationDispatcher, WebhookIntegration};
pub use reader::{FeedHandler, Fetcher, HttpFetcher, RefreshSummary};
pub use scheduler::{compute_next_check, BatchBuilder, Job, PollingScheduler, SchedulerConfig};
pub use worker::{JobHandler, WorkerPool};

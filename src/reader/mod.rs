//! Feed reader: retrieval, parsing, filtering and the refresh pipeline.

pub mod fetcher;
pub mod filter;
pub mod handler;
pub mod icon;
pub mod parser;

pub use fetcher::{FetchResponse, Fetcher, HttpFetcher, RequestOptions};
pub use filter::{validate_legacy_rule, validate_rules, DatePredicate, EntryFilter, RuleSet};
pub use handler::{FeedHandler, RefreshSummary};
pub use icon::IconFinder;
pub use parser::{parse_feed, ParsedFeed};

//! Block and keep rules applied to entries before they are stored.
//!
//! Structured rule sets hold one `Field=pattern` rule per line:
//!
//! ```text
//! EntryTitle=(?i)sponsored
//! EntryTag=^ads$
//! EntryDate=before:2024-01-01
//! ```
//!
//! Supported fields are `EntryTitle`, `EntryURL`, `EntryCommentsURL`,
//! `EntryContent`, `EntryAuthor`, `EntryTag` and `EntryDate`. Date patterns
//! are `future`, `before:YYYY-MM-DD`, `after:YYYY-MM-DD`,
//! `between:YYYY-MM-DD,YYYY-MM-DD` and `max-age:<n><d|h|m|s>`.
//!
//! Legacy feed rules (`blocklist_rules`, `keeplist_rules`) are a single regex
//! tested against the URL, title, author and tags.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::db::User;
use crate::entry::NewEntry;
use crate::feed::Feed;
use crate::{FeedloomError, Result};

/// Entry attribute a structured rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Title,
    Url,
    CommentsUrl,
    Content,
    Author,
    Tag,
    Date,
}

impl RuleField {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "EntryTitle" => Some(Self::Title),
            "EntryURL" => Some(Self::Url),
            "EntryCommentsURL" => Some(Self::CommentsUrl),
            "EntryContent" => Some(Self::Content),
            "EntryAuthor" => Some(Self::Author),
            "EntryTag" => Some(Self::Tag),
            "EntryDate" => Some(Self::Date),
            _ => None,
        }
    }
}

/// Predicate over an entry's publication date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatePredicate {
    Future,
    Before(DateTime<Utc>),
    After(DateTime<Utc>),
    /// Exclusive on both ends.
    Between(DateTime<Utc>, DateTime<Utc>),
    MaxAge(Duration),
}

impl DatePredicate {
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern == "future" {
            return Some(Self::Future);
        }
        let (operator, value) = pattern.split_once(':')?;
        match operator {
            "before" => parse_day(value).map(Self::Before),
            "after" => parse_day(value).map(Self::After),
            "between" => {
                let (start, end) = value.split_once(',')?;
                Some(Self::Between(parse_day(start)?, parse_day(end)?))
            }
            "max-age" => parse_age(value).map(Self::MaxAge),
            _ => None,
        }
    }

    pub fn matches(&self, date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Future => date > now,
            Self::Before(limit) => date < *limit,
            Self::After(limit) => date > *limit,
            Self::Between(start, end) => date > *start && date < *end,
            Self::MaxAge(age) => now - date > *age,
        }
    }
}

fn parse_day(value: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

fn parse_age(value: &str) -> Option<Duration> {
    let value = value.trim();
    let unit = value.chars().last()?;
    let amount: i64 = value[..value.len() - unit.len_utf8()].parse().ok()?;
    if amount < 0 {
        return None;
    }
    match unit {
        'd' => Duration::try_days(amount),
        'h' => Duration::try_hours(amount),
        'm' => Duration::try_minutes(amount),
        's' => Duration::try_seconds(amount),
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Pattern(Regex),
    Date(DatePredicate),
}

#[derive(Debug, Clone)]
struct Rule {
    field: RuleField,
    matcher: Matcher,
    line: String,
}

impl Rule {
    fn parse(line: &str) -> Result<Option<Self>> {
        let (name, pattern) = line
            .split_once('=')
            .ok_or_else(|| FeedloomError::Validation(format!("missing '=' in rule: {line}")))?;
        let Some(field) = RuleField::from_name(name.trim()) else {
            return Ok(None);
        };
        let matcher = match field {
            RuleField::Date => DatePredicate::parse(pattern)
                .map(Matcher::Date)
                .ok_or_else(|| FeedloomError::Validation(format!("invalid date rule: {line}")))?,
            _ => Regex::new(pattern)
                .map(Matcher::Pattern)
                .map_err(|e| FeedloomError::Validation(format!("{line}: {e}")))?,
        };
        Ok(Some(Self {
            field,
            matcher,
            line: line.to_string(),
        }))
    }

    fn matches(&self, entry: &NewEntry, now: DateTime<Utc>) -> bool {
        let re = match &self.matcher {
            Matcher::Date(predicate) => return predicate.matches(entry.published_at, now),
            Matcher::Pattern(re) => re,
        };
        match self.field {
            RuleField::Title => re.is_match(&entry.title),
            RuleField::Url => re.is_match(&entry.url),
            RuleField::CommentsUrl => re.is_match(&entry.comments_url),
            RuleField::Content => re.is_match(&entry.content),
            RuleField::Author => re.is_match(&entry.author),
            RuleField::Tag => entry.tags.iter().any(|tag| re.is_match(tag)),
            RuleField::Date => false,
        }
    }
}

/// A compiled set of structured rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    present: bool,
    invalid: bool,
}

impl RuleSet {
    /// Strict parse, used when rules are submitted.
    ///
    /// Unknown field names are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rule) = Rule::parse(line)? {
                rules.push(rule);
            }
        }
        Ok(Self {
            present: !text.trim().is_empty(),
            rules,
            invalid: false,
        })
    }

    /// Lenient parse, used at evaluation time. A malformed set is kept as
    /// present but invalid instead of failing.
    pub fn compile(text: &str) -> Self {
        match Self::parse(text) {
            Ok(set) => set,
            Err(e) => {
                warn!("Ignoring malformed filter rules: {}", e);
                Self {
                    rules: Vec::new(),
                    present: true,
                    invalid: true,
                }
            }
        }
    }

    /// True when the source text had at least one non-blank line.
    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// First rule matching the entry, in declaration order.
    fn first_match(&self, entry: &NewEntry, now: DateTime<Utc>) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(entry, now))
            .map(|rule| rule.line.as_str())
    }
}

/// Legacy single-regex rule.
#[derive(Debug, Clone, Default)]
struct LegacyRule {
    pattern: Option<Regex>,
    present: bool,
}

impl LegacyRule {
    fn compile(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::default();
        }
        let pattern = Regex::new(text)
            .map_err(|e| warn!("Ignoring malformed legacy filter {:?}: {}", text, e))
            .ok();
        Self {
            pattern,
            present: true,
        }
    }

    fn is_invalid(&self) -> bool {
        self.present && self.pattern.is_none()
    }

    fn matches(&self, entry: &NewEntry) -> bool {
        self.pattern.as_ref().is_some_and(|re| {
            re.is_match(&entry.url)
                || re.is_match(&entry.title)
                || re.is_match(&entry.author)
                || entry.tags.iter().any(|tag| re.is_match(tag))
        })
    }
}

/// Check submitted rules, rejecting malformed ones.
pub fn validate_rules(structured: &str) -> Result<()> {
    RuleSet::parse(structured).map(|_| ())
}

/// Check a submitted legacy regex.
pub fn validate_legacy_rule(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Ok(());
    }
    Regex::new(pattern.trim())
        .map(|_| ())
        .map_err(|e| FeedloomError::Validation(e.to_string()))
}

/// Merged filter for one feed of one user, compiled once per refresh.
///
/// A user rule set, when present, replaces the feed rules for its action.
/// Invalid block rules block nothing and invalid keep rules keep everything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    user_block: RuleSet,
    user_keep: RuleSet,
    feed_block: RuleSet,
    feed_keep: RuleSet,
    blocklist: LegacyRule,
    keeplist: LegacyRule,
}

impl EntryFilter {
    pub fn new(user: &User, feed: &Feed) -> Self {
        Self {
            user_block: RuleSet::compile(&user.block_filter_entry_rules),
            user_keep: RuleSet::compile(&user.keep_filter_entry_rules),
            feed_block: RuleSet::compile(&feed.block_filter_entry_rules),
            feed_keep: RuleSet::compile(&feed.keep_filter_entry_rules),
            blocklist: LegacyRule::compile(&feed.blocklist_rules),
            keeplist: LegacyRule::compile(&feed.keeplist_rules),
        }
    }

    pub fn is_blocked(&self, entry: &NewEntry, now: DateTime<Utc>) -> bool {
        if self.user_block.is_present() {
            return log_match("Blocking", entry, self.user_block.first_match(entry, now));
        }
        if log_match("Blocking", entry, self.feed_block.first_match(entry, now)) {
            return true;
        }
        let blocked = self.blocklist.matches(entry);
        if blocked {
            debug!(url = %entry.url, "Blocking entry based on feed blocklist");
        }
        blocked
    }

    pub fn is_allowed(&self, entry: &NewEntry, now: DateTime<Utc>) -> bool {
        if self.user_keep.is_present() {
            return self.user_keep.is_invalid()
                || log_match("Keeping", entry, self.user_keep.first_match(entry, now));
        }
        if self.feed_keep.is_present() {
            return self.feed_keep.is_invalid()
                || log_match("Keeping", entry, self.feed_keep.first_match(entry, now));
        }
        if self.keeplist.present {
            return self.keeplist.is_invalid() || self.keeplist.matches(entry);
        }
        true
    }

    /// Whether the entry may be stored.
    pub fn admits(&self, entry: &NewEntry, now: DateTime<Utc>) -> bool {
        !self.is_blocked(entry, now) && self.is_allowed(entry, now)
    }
}

fn log_match(action: &str, entry: &NewEntry, rule: Option<&str>) -> bool {
    match rule {
        Some(rule) => {
            debug!(url = %entry.url, rule, "{} entry based on rule", action);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::feed::FeedCreationRequest;
    use chrono::TimeZone;

    fn user(block: &str, keep: &str) -> User {
        let new = NewUser::new("alice")
            .with_block_rules(block)
            .with_keep_rules(keep);
        User {
            id: 1,
            username: new.username,
            language: new.language,
            block_filter_entry_rules: new.block_filter_entry_rules,
            keep_filter_entry_rules: new.keep_filter_entry_rules,
            created_at: Utc::now(),
        }
    }

    fn feed() -> Feed {
        Feed::from_request(1, &FeedCreationRequest::new("https://example.com/feed"), Utc::now())
    }

    fn entry(title: &str) -> NewEntry {
        NewEntry {
            hash: "h".to_string(),
            title: title.to_string(),
            url: "https://example.com/posts/1".to_string(),
            author: "Jane".to_string(),
            content: "<p>body</p>".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
            tags: vec!["rust".to_string(), "news".to_string()],
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_user_block_rules_by_field() {
        let cases = [
            ("EntryTitle=(?i)sponsored", true),
            ("EntryURL=/posts/", true),
            ("EntryCommentsURL=.+", false),
            ("EntryContent=body", true),
            ("EntryAuthor=^John$", false),
            ("EntryTag=^news$", true),
            ("EntryDate=before:2024-03-11", true),
            ("EntryDate=after:2024-03-11", false),
            ("EntryDate=between:2024-03-01,2024-03-31", true),
            ("EntryDate=future", false),
            ("EntryDate=max-age:7d", true),
            ("EntryDate=max-age:30d", false),
        ];
        for (rule, expected) in cases {
            let filter = EntryFilter::new(&user(rule, ""), &feed());
            assert_eq!(
                filter.is_blocked(&entry("Sponsored post"), now()),
                expected,
                "rule {rule}"
            );
        }
    }

    #[test]
    fn test_first_matching_line_blocks() {
        let filter = EntryFilter::new(&user("EntryTitle=nothing\nEntryTag=rust", ""), &feed());
        assert!(filter.is_blocked(&entry("Hello"), now()));
    }

    #[test]
    fn test_user_rules_take_precedence_over_feed_rules() {
        let mut feed = feed();
        feed.block_filter_entry_rules = "EntryTitle=Hello".to_string();
        feed.blocklist_rules = "Hello".to_string();

        let filter = EntryFilter::new(&user("EntryTitle=Goodbye", ""), &feed);
        assert!(!filter.is_blocked(&entry("Hello"), now()));

        let filter = EntryFilter::new(&user("", ""), &feed);
        assert!(filter.is_blocked(&entry("Hello"), now()));
    }

    #[test]
    fn test_legacy_blocklist_fields() {
        let mut feed = feed();
        feed.blocklist_rules = "^news$".to_string();
        let filter = EntryFilter::new(&user("", ""), &feed);
        assert!(filter.is_blocked(&entry("Hello"), now()));

        // Content is not part of the legacy match.
        feed.blocklist_rules = "body".to_string();
        let filter = EntryFilter::new(&user("", ""), &feed);
        assert!(!filter.is_blocked(&entry("Hello"), now()));
    }

    #[test]
    fn test_keep_rules() {
        let filter = EntryFilter::new(&user("", "EntryTitle=Rust"), &feed());
        assert!(filter.is_allowed(&entry("Rust 2024"), now()));
        assert!(!filter.is_allowed(&entry("Go 1.22"), now()));

        let mut feed = feed();
        feed.keeplist_rules = "(?i)rust".to_string();
        let filter = EntryFilter::new(&user("", ""), &feed);
        assert!(filter.is_allowed(&entry("Anything"), now()));

        let filter = EntryFilter::new(&user("", ""), &self::feed());
        assert!(filter.is_allowed(&entry("Anything"), now()));
    }

    #[test]
    fn test_malformed_rules_never_drop_entries() {
        let mut feed = feed();
        feed.blocklist_rules = "(unclosed".to_string();
        feed.keeplist_rules = "[bad".to_string();
        let filter = EntryFilter::new(&user("", ""), &feed);
        assert!(filter.admits(&entry("Hello"), now()));

        let filter = EntryFilter::new(&user("EntryTitle=(", "EntryTitle=("), &self::feed());
        assert!(!filter.is_blocked(&entry("Hello"), now()));
        assert!(filter.is_allowed(&entry("Hello"), now()));
    }

    #[test]
    fn test_admits_requires_not_blocked_and_allowed() {
        let filter = EntryFilter::new(&user("EntryTitle=Spam", "EntryTag=rust"), &feed());
        assert!(filter.admits(&entry("Hello"), now()));
        assert!(!filter.admits(&entry("Spam"), now()));

        let mut other = entry("Hello");
        other.tags.clear();
        assert!(!filter.admits(&other, now()));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let filter = EntryFilter::new(&user("EntryColor=red", ""), &feed());
        assert!(!filter.is_blocked(&entry("Hello"), now()));
        assert!(validate_rules("EntryColor=red").is_ok());
    }

    #[test]
    fn test_validate_rules() {
        assert!(validate_rules("").is_ok());
        assert!(validate_rules("EntryTitle=ok\n\nEntryDate=future").is_ok());
        assert!(matches!(
            validate_rules("EntryTitle=("),
            Err(FeedloomError::Validation(_))
        ));
        assert!(validate_rules("EntryTitle").is_err());
        assert!(validate_rules("EntryDate=before:yesterday").is_err());
        assert!(validate_legacy_rule("(?i)ads").is_ok());
        assert!(validate_legacy_rule("(").is_err());
    }

    #[test]
    fn test_out_of_range_age_is_rejected() {
        for rule in [
            "EntryDate=max-age:999999999999d",
            "EntryDate=max-age:9223372036854775807s",
        ] {
            assert!(
                matches!(validate_rules(rule), Err(FeedloomError::Validation(_))),
                "rule {rule}"
            );

            let filter = EntryFilter::new(&user(rule, rule), &feed());
            assert!(!filter.is_blocked(&entry("Hello"), now()));
            assert!(filter.is_allowed(&entry("Hello"), now()));
        }
    }

    #[test]
    fn test_date_predicates() {
        let now = now();
        let date = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert!(DatePredicate::parse("future")
            .unwrap()
            .matches(now + Duration::hours(1), now));
        // Bounds are exclusive.
        assert!(!DatePredicate::parse("between:2024-03-10,2024-03-12")
            .unwrap()
            .matches(date, now));
        assert_eq!(
            DatePredicate::parse("max-age:12h"),
            Some(DatePredicate::MaxAge(Duration::hours(12)))
        );
        assert_eq!(DatePredicate::parse("max-age:12w"), None);
        assert_eq!(DatePredicate::parse("max-age:999999999999d"), None);
        assert_eq!(DatePredicate::parse("between:2024-03-10"), None);
        assert_eq!(DatePredicate::parse("someday"), None);
    }
}

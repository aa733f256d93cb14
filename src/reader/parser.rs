//! Feed document parsing.
//!
//! RSS, Atom and JSON Feed documents are decoded by feed-rs and normalized
//! into a [`ParsedFeed`] whose entries are ready for reconciliation.

use chrono::{DateTime, Utc};
use feed_rs::model::{Entry as RawEntry, Link};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use url::Url;

use crate::entry::NewEntry;
use crate::{FeedloomError, Result};

/// Average adult reading speed used for reading time estimates.
const WORDS_PER_MINUTE: usize = 265;

/// A decoded feed document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: String,
    pub site_url: String,
    pub icon_url: Option<String>,
    /// RSS `<ttl>`, in minutes.
    pub ttl_minutes: Option<i64>,
    pub entries: Vec<NewEntry>,
}

/// Parse a fetched document.
///
/// `base_url` is the effective URL of the document. Relative links are
/// resolved against it, and it stands in for a missing site URL.
pub fn parse_feed(base_url: &str, bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::Builder::new()
        .base_uri(Some(base_url))
        .build()
        .parse(bytes)
        .map_err(|e| FeedloomError::Parse(e.to_string()))?;

    let base = Url::parse(base_url).ok();
    let site_url = pick_link(&feed.links)
        .map(|href| resolve(base.as_ref(), href))
        .unwrap_or_else(|| base_url.to_string());
    let site_base = Url::parse(&site_url).ok().or_else(|| base.clone());

    let title = feed
        .title
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| site_url.clone());

    let icon_url = feed
        .icon
        .or(feed.logo)
        .map(|image| resolve(site_base.as_ref(), &image.uri));

    let now = Utc::now();
    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| convert_entry(entry, site_base.as_ref(), now))
        .collect();

    Ok(ParsedFeed {
        title,
        site_url,
        icon_url,
        ttl_minutes: feed.ttl.map(i64::from).filter(|ttl| *ttl > 0),
        entries,
    })
}

fn convert_entry(entry: RawEntry, base: Option<&Url>, now: DateTime<Utc>) -> Option<NewEntry> {
    let url = pick_link(&entry.links)
        .map(|href| resolve(base, href))
        .unwrap_or_default();
    let comments_url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("replies"))
        .map(|l| resolve(base, &l.href))
        .unwrap_or_default();

    let identity = if entry.id.is_empty() { &url } else { &entry.id };
    if identity.is_empty() {
        return None;
    }
    let hash = hex::encode(Sha256::digest(identity.as_bytes()));

    let content = entry
        .content
        .and_then(|c| c.body)
        .or(entry.summary.map(|s| s.content))
        .unwrap_or_default();
    let title = entry
        .title
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.clone());
    let author = entry
        .authors
        .iter()
        .map(|a| a.name.trim())
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    let tags = entry
        .categories
        .into_iter()
        .map(|c| c.label.unwrap_or(c.term).trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();

    Some(NewEntry {
        hash,
        reading_time: reading_time(&content),
        title,
        url,
        comments_url,
        author,
        content,
        published_at: entry.published.or(entry.updated).unwrap_or(now),
        tags,
    })
}

/// First alternate link, or the first link of any kind.
fn pick_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.iter().find(|l| l.rel.as_deref() != Some("self")))
        .map(|l| l.href.as_str())
        .filter(|href| !href.is_empty())
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    let href = href.trim();
    match base {
        Some(base) => base
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

/// Estimated minutes needed to read an HTML fragment.
pub fn reading_time(html: &str) -> i32 {
    let words = strip_html(html).split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE) as i32
}

/// Longest entity name worth buffering (`&CounterClockwiseContourIntegral;`).
const MAX_ENTITY_LEN: usize = 32;

/// Strip HTML tags and decode common entities.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_entity = false;
    let mut entity = String::new();

    for ch in html.chars() {
        // A bare ampersand is literal text.
        if in_entity
            && (entity.len() > MAX_ENTITY_LEN
                || !(ch == ';' || ch == '#' || ch.is_ascii_alphanumeric()))
        {
            in_entity = false;
            result.push('&');
            result.push_str(&entity);
            entity.clear();
        }
        match ch {
            '<' => {
                in_tag = true;
                result.push(' ');
            }
            '>' => in_tag = false,
            '&' if !in_tag => {
                in_entity = true;
                entity.clear();
            }
            ';' if in_entity => {
                in_entity = false;
                match entity.as_str() {
                    "amp" => result.push('&'),
                    "lt" => result.push('<'),
                    "gt" => result.push('>'),
                    "quot" => result.push('"'),
                    "apos" => result.push('\''),
                    "nbsp" => result.push(' '),
                    _ => match parse_numeric_entity(&entity).and_then(char::from_u32) {
                        Some(c) => result.push(c),
                        None => {
                            result.push('&');
                            result.push_str(&entity);
                            result.push(';');
                        }
                    },
                }
            }
            _ if in_entity => entity.push(ch),
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    if in_entity {
        result.push('&');
        result.push_str(&entity);
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Numeric entity body such as `#123` or `#x7B`.
fn parse_numeric_entity(entity: &str) -> Option<u32> {
    let digits = entity.strip_prefix('#')?;
    match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com/</link>
    <ttl>90</ttl>
    <item>
      <title>First Article</title>
      <link>/posts/1</link>
      <guid>guid-1</guid>
      <category>rust</category>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No guid</title>
      <link>https://example.com/posts/2</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss() {
        let feed = parse_feed("https://example.com/feed.xml", RSS.as_bytes()).unwrap();
        assert_eq!(feed.title, "Test Feed");
        assert!(feed.site_url.starts_with("https://example.com"));
        assert_eq!(feed.ttl_minutes, Some(90));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.title, "First Article");
        assert_eq!(first.url, "https://example.com/posts/1");
        assert_eq!(first.tags, vec!["rust".to_string()]);
        assert!(first.content.contains("<b>world</b>"));
        assert_eq!(first.reading_time, 1);
        assert_eq!(first.published_at.to_rfc3339(), "2025-01-06T10:00:00+00:00");
        assert_eq!(
            first.hash,
            hex::encode(Sha256::digest("guid-1".as_bytes()))
        );
        assert_eq!(first.hash.len(), 64);
        assert_ne!(feed.entries[1].hash, first.hash);
    }

    #[test]
    fn test_hash_is_stable_across_parses() {
        let a = parse_feed("https://example.com/feed.xml", RSS.as_bytes()).unwrap();
        let b = parse_feed("https://example.com/feed.xml", RSS.as_bytes()).unwrap();
        let hashes_a: Vec<_> = a.entries.iter().map(|e| e.hash.clone()).collect();
        let hashes_b: Vec<_> = b.entries.iter().map(|e| e.hash.clone()).collect();
        assert_eq!(hashes_a, hashes_b);
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <link rel="self" href="https://example.com/atom.xml"/>
  <link rel="alternate" href="https://example.com/blog/"/>
  <icon>/favicon.png</icon>
  <entry>
    <id>urn:uuid:1</id>
    <title>Atom Entry</title>
    <link rel="alternate" href="https://example.com/blog/entry"/>
    <link rel="replies" type="text/html" href="https://example.com/blog/entry#comments"/>
    <summary>Entry summary</summary>
    <author><name>Jane</name></author>
    <author><name>John</name></author>
    <updated>2025-01-01T00:00:00Z</updated>
  </entry>
</feed>"#;

        let feed = parse_feed("https://example.com/atom.xml", atom.as_bytes()).unwrap();
        assert_eq!(feed.title, "Atom Feed");
        assert_eq!(feed.site_url, "https://example.com/blog/");
        assert_eq!(feed.icon_url.as_deref(), Some("https://example.com/favicon.png"));
        assert_eq!(feed.ttl_minutes, None);

        let entry = &feed.entries[0];
        assert_eq!(entry.url, "https://example.com/blog/entry");
        assert_eq!(entry.comments_url, "https://example.com/blog/entry#comments");
        assert_eq!(entry.author, "Jane, John");
        assert_eq!(entry.content, "Entry summary");
    }

    #[test]
    fn test_untitled_entry_uses_url() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item><link>https://example.com/a</link><guid>a</guid></item>
</channel></rss>"#;
        let feed = parse_feed("https://example.com/feed", rss.as_bytes()).unwrap();
        assert_eq!(feed.entries[0].title, "https://example.com/a");
        assert_eq!(feed.title, "https://example.com/feed");
    }

    #[test]
    fn test_parse_invalid() {
        let err = parse_feed("https://example.com/", b"This is not XML").unwrap_err();
        assert!(matches!(err, FeedloomError::Parse(_)));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>World</b></p>"), "Hello World");
        assert_eq!(strip_html("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(strip_html("&#65;&#x42;&#X43;"), "ABC");
        assert_eq!(strip_html("&unknown; text"), "&unknown; text");
        assert_eq!(strip_html("line<br>break"), "line break");
    }

    #[test]
    fn test_strip_html_keeps_bare_ampersands() {
        assert_eq!(strip_html("Q&A with the team"), "Q&A with the team");
        assert_eq!(strip_html("AT&T earnings beat"), "AT&T earnings beat");
        assert_eq!(strip_html("rock & roll"), "rock & roll");
        assert_eq!(strip_html("fish&chips"), "fish&chips");
        assert_eq!(strip_html("Tom&<b>Jerry</b>"), "Tom& Jerry");
        assert_eq!(strip_html("&&amp;"), "&&");
        assert_eq!(
            strip_html(&format!("&{} tail", "a".repeat(40))),
            format!("&{} tail", "a".repeat(40))
        );
    }

    #[test]
    fn test_entity_escaped_ampersand_in_title() {
        let xml = br#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Q&amp;A weekly</title>
  <link>https://example.com/</link>
  <item>
    <title>Q&amp;A with the team</title>
    <link>https://example.com/qa</link>
    <guid>qa-1</guid>
  </item>
</channel></rss>"#;
        let feed = parse_feed("https://example.com/feed", xml).unwrap();
        assert_eq!(feed.title, "Q&A weekly");
        assert_eq!(feed.entries[0].title, "Q&A with the team");
    }

    #[test]
    fn test_reading_time() {
        assert_eq!(reading_time(""), 0);
        assert_eq!(reading_time("<p>short</p>"), 1);
        let long = "word ".repeat(WORDS_PER_MINUTE * 2 + 1);
        assert_eq!(reading_time(&long), 3);
    }
}

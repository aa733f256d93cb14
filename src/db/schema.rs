//! Database schema and migrations.
//!
//! Migrations are applied in order when the database is opened. The
//! `schema_version` table records which ones have run. Timestamp columns
//! hold values produced by [`crate::datetime::to_db`].

pub const MIGRATIONS: &[&str] = &[
    // v1: users and categories
    r#"
CREATE TABLE users (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    username                    TEXT NOT NULL UNIQUE,
    language                    TEXT NOT NULL DEFAULT 'en',
    block_filter_entry_rules    TEXT NOT NULL DEFAULT '',
    keep_filter_entry_rules     TEXT NOT NULL DEFAULT '',
    created_at                  TEXT NOT NULL
);

CREATE TABLE categories (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title       TEXT NOT NULL,
    UNIQUE (user_id, title)
);
"#,
    // v2: feeds
    r#"
CREATE TABLE feeds (
    id                              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id                         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    category_id                     INTEGER REFERENCES categories(id) ON DELETE SET NULL,
    feed_url                        TEXT NOT NULL,
    site_url                        TEXT NOT NULL DEFAULT '',
    title                           TEXT NOT NULL DEFAULT '',
    checked_at                      TEXT,
    next_check_at                   TEXT NOT NULL,
    etag_header                     TEXT NOT NULL DEFAULT '',
    last_modified_header            TEXT NOT NULL DEFAULT '',
    parsing_error_msg               TEXT NOT NULL DEFAULT '',
    parsing_error_count             INTEGER NOT NULL DEFAULT 0,
    scraper_rules                   TEXT NOT NULL DEFAULT '',
    rewrite_rules                   TEXT NOT NULL DEFAULT '',
    crawler                         INTEGER NOT NULL DEFAULT 0,
    blocklist_rules                 TEXT NOT NULL DEFAULT '',
    keeplist_rules                  TEXT NOT NULL DEFAULT '',
    block_filter_entry_rules        TEXT NOT NULL DEFAULT '',
    keep_filter_entry_rules         TEXT NOT NULL DEFAULT '',
    user_agent                      TEXT NOT NULL DEFAULT '',
    cookie                          TEXT NOT NULL DEFAULT '',
    username                        TEXT NOT NULL DEFAULT '',
    password                        TEXT NOT NULL DEFAULT '',
    disabled                        INTEGER NOT NULL DEFAULT 0,
    ignore_http_cache               INTEGER NOT NULL DEFAULT 0,
    allow_self_signed_certificates  INTEGER NOT NULL DEFAULT 0,
    fetch_via_proxy                 INTEGER NOT NULL DEFAULT 0,
    created_at                      TEXT NOT NULL,
    UNIQUE (user_id, feed_url)
);

CREATE INDEX idx_feeds_next_check_at ON feeds(next_check_at);
CREATE INDEX idx_feeds_user_category ON feeds(user_id, category_id);
"#,
    // v3: entries
    r#"
CREATE TABLE entries (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    feed_id         INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    hash            TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'unread',
    title           TEXT NOT NULL,
    url             TEXT NOT NULL DEFAULT '',
    comments_url    TEXT NOT NULL DEFAULT '',
    author          TEXT NOT NULL DEFAULT '',
    content         TEXT NOT NULL DEFAULT '',
    published_at    TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    changed_at      TEXT NOT NULL,
    starred         INTEGER NOT NULL DEFAULT 0,
    reading_time    INTEGER NOT NULL DEFAULT 0,
    tags            TEXT NOT NULL DEFAULT '[]',
    UNIQUE (feed_id, hash)
);

CREATE INDEX idx_entries_feed_status ON entries(feed_id, status);
CREATE INDEX idx_entries_user_status ON entries(user_id, status);
CREATE INDEX idx_entries_feed_published ON entries(feed_id, published_at);
"#,
    // v4: icons
    r#"
CREATE TABLE icons (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    hash        TEXT NOT NULL UNIQUE,
    mime_type   TEXT NOT NULL,
    content     BLOB NOT NULL
);

CREATE TABLE feed_icons (
    feed_id     INTEGER PRIMARY KEY REFERENCES feeds(id) ON DELETE CASCADE,
    icon_id     INTEGER NOT NULL REFERENCES icons(id) ON DELETE CASCADE
);
"#,
];

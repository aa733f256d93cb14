//! User and category models.

use chrono::{DateTime, Utc};

/// A reader account. Owns feeds, categories and entries.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Language of user-facing messages such as feed errors.
    pub language: String,
    /// User-wide block rules, one `Type=Value` rule per line.
    pub block_filter_entry_rules: String,
    /// User-wide keep rules, one `Type=Value` rule per line.
    pub keep_filter_entry_rules: String,
    pub created_at: DateTime<Utc>,
}

/// Data for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub language: String,
    pub block_filter_entry_rules: String,
    pub keep_filter_entry_rules: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            language: "en".to_string(),
            block_filter_entry_rules: String::new(),
            keep_filter_entry_rules: String::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
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
}

/// Data for updating an existing user. Unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub language: Option<String>,
    pub block_filter_entry_rules: Option<String>,
    pub keep_filter_entry_rules: Option<String>,
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
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

    pub fn is_empty(&self) -> bool {
        self.language.is_none()
            && self.block_filter_entry_rules.is_none()
            && self.keep_filter_entry_rules.is_none()
    }
}

/// A user-owned grouping of feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
}

//! Message catalogs for user-facing feed error messages.
//!
//! Catalogs are TOML tables flattened into dot-separated keys. The `en` and
//! `ja` catalogs are compiled into the binary; additional catalogs can be
//! loaded from a directory at startup.
//!
//! ```
//! use feedloom::i18n::I18n;
//!
//! let i18n = I18n::from_str("en", r#"
//! [error]
//! http_unexpected_status_code = "Unexpected status code: {{status}}."
//! "#).unwrap();
//!
//! let text = i18n.t_with("error.http_unexpected_status_code", &[("status", "418")]);
//! assert_eq!(text, "Unexpected status code: 418.");
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Language used when a user's language has no catalog.
pub const DEFAULT_LANGUAGE: &str = "en";

const EMBEDDED_CATALOGS: &[(&str, &str)] = &[
    ("en", include_str!("../../locales/en.toml")),
    ("ja", include_str!("../../locales/ja.toml")),
];

/// Catalog loading errors.
#[derive(Error, Debug)]
pub enum I18nError {
    #[error("failed to read catalog: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("catalog not found: {0}")]
    LocaleNotFound(String),
}

pub type Result<T> = std::result::Result<T, I18nError>;

/// A single language catalog.
#[derive(Debug, Clone)]
pub struct I18n {
    locale: String,
    messages: HashMap<String, String>,
}

impl I18n {
    /// Load `{locale}.toml` from a directory.
    pub fn load<P: AsRef<Path>>(locale: &str, dir: P) -> Result<Self> {
        let path = dir.as_ref().join(format!("{locale}.toml"));
        if !path.exists() {
            return Err(I18nError::LocaleNotFound(locale.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Self::from_str(locale, &content)
    }

    /// Build a catalog from TOML text.
    pub fn from_str(locale: &str, content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut messages = HashMap::new();
        flatten("", &toml::Value::Table(table), &mut messages);
        Ok(Self {
            locale: locale.to_string(),
            messages,
        })
    }

    /// One of the catalogs compiled into the binary.
    pub fn embedded(locale: &str) -> Result<Self> {
        let (_, content) = EMBEDDED_CATALOGS
            .iter()
            .find(|(name, _)| *name == locale)
            .ok_or_else(|| I18nError::LocaleNotFound(locale.to_string()))?;
        Self::from_str(locale, content)
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Translate a key. Unknown keys are returned unchanged.
    pub fn t<'a>(&'a self, key: &'a str) -> &'a str {
        self.messages.get(key).map(|s| s.as_str()).unwrap_or(key)
    }

    /// Translate a key and substitute `{{name}}` placeholders.
    pub fn t_with(&self, key: &str, params: &[(&str, &str)]) -> String {
        let mut result = self.t(key).to_string();
        for (name, value) in params {
            let placeholder = format!("{{{{{name}}}}}");
            result = result.replace(&placeholder, value);
        }
        result
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.messages.contains_key(key)
    }
}

fn flatten(prefix: &str, value: &toml::Value, map: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, val) in table {
                let next = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&next, val, map);
            }
        }
        toml::Value::String(s) => {
            map.insert(prefix.to_string(), s.clone());
        }
        // Only string leaves are messages.
        _ => {}
    }
}

/// All catalogs available to the engine, selected per user language.
#[derive(Debug, Clone)]
pub struct I18nManager {
    catalogs: HashMap<String, Arc<I18n>>,
    default_language: String,
}

impl I18nManager {
    /// Manager holding the embedded catalogs.
    pub fn embedded(default_language: &str) -> Result<Self> {
        let mut manager = Self {
            catalogs: HashMap::new(),
            default_language: DEFAULT_LANGUAGE.to_string(),
        };
        for (locale, _) in EMBEDDED_CATALOGS {
            manager.add_locale(I18n::embedded(locale)?);
        }
        if manager.catalogs.contains_key(default_language) {
            manager.default_language = default_language.to_string();
        }
        Ok(manager)
    }

    /// Add every `*.toml` catalog found in `dir`, replacing embedded ones
    /// with the same name.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                if let Some(stem) = path.file_stem() {
                    let locale = stem.to_string_lossy().to_string();
                    self.add_locale(I18n::load(&locale, dir)?);
                }
            }
        }
        Ok(())
    }

    pub fn add_locale(&mut self, i18n: I18n) {
        self.catalogs
            .insert(i18n.locale().to_string(), Arc::new(i18n));
    }

    /// Catalog for a language, falling back to the default language.
    pub fn get(&self, language: &str) -> Arc<I18n> {
        let short = language.split(['_', '-']).next().unwrap_or(language);
        self.catalogs
            .get(language)
            .or_else(|| self.catalogs.get(short))
            .or_else(|| self.catalogs.get(&self.default_language))
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(I18n {
                    locale: self.default_language.clone(),
                    messages: HashMap::new(),
                })
            })
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_str_nested_keys() {
        let i18n = I18n::from_str(
            "en",
            r#"
[error]
duplicated_feed = "dup"

[error.http]
nested = "deep"
"#,
        )
        .unwrap();
        assert_eq!(i18n.t("error.duplicated_feed"), "dup");
        assert_eq!(i18n.t("error.http.nested"), "deep");
    }

    #[test]
    fn test_unknown_key_returns_key() {
        let i18n = I18n::from_str("en", "").unwrap();
        assert_eq!(i18n.t("error.missing"), "error.missing");
    }

    #[test]
    fn test_t_with_multiple_params() {
        let i18n = I18n::from_str("en", r#"msg = "{{a}} and {{b}} and {{a}}""#).unwrap();
        assert_eq!(i18n.t_with("msg", &[("a", "x"), ("b", "y")]), "x and y and x");
    }

    #[test]
    fn test_embedded_catalogs_share_keys() {
        let en = I18n::embedded("en").unwrap();
        let ja = I18n::embedded("ja").unwrap();
        for key in en.messages.keys() {
            assert!(ja.has_key(key), "ja catalog is missing {key}");
        }
    }

    #[test]
    fn test_embedded_unknown_locale() {
        assert!(matches!(
            I18n::embedded("xx"),
            Err(I18nError::LocaleNotFound(_))
        ));
    }

    #[test]
    fn test_manager_fallback() {
        let manager = I18nManager::embedded("en").unwrap();
        assert_eq!(manager.get("ja").locale(), "ja");
        assert_eq!(manager.get("ja_JP").locale(), "ja");
        assert_eq!(manager.get("fr_FR").locale(), "en");
    }

    #[test]
    fn test_manager_unknown_default_keeps_en() {
        let manager = I18nManager::embedded("xx").unwrap();
        assert_eq!(manager.default_language(), "en");
    }

    #[test]
    fn test_manager_load_dir_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("en.toml"),
            "[error]\nduplicated_feed = \"custom\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("de.toml"), "[error]\nduplicated_feed = \"doppelt\"\n")
            .unwrap();

        let mut manager = I18nManager::embedded("en").unwrap();
        manager.load_dir(dir.path()).unwrap();

        assert_eq!(manager.get("en").t("error.duplicated_feed"), "custom");
        assert_eq!(manager.get("de").t("error.duplicated_feed"), "doppelt");
    }
}

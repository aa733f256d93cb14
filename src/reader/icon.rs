//! Favicon discovery.

use std::sync::Arc;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::fetcher::{Fetcher, RequestOptions};
use crate::feed::Icon;

/// Finds an icon for a feed.
///
/// Candidates are tried in order: the icon advertised by the feed, the
/// `<link rel="icon">` of the site's home page, then `/favicon.ico`.
pub struct IconFinder {
    fetcher: Arc<dyn Fetcher>,
}

impl IconFinder {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Download the first candidate that yields an image. Failures are not errors.
    pub async fn find(
        &self,
        site_url: &str,
        feed_icon_url: Option<&str>,
        options: &RequestOptions,
    ) -> Option<Icon> {
        let options = options.without_validators();
        let site = Url::parse(site_url).ok()?;

        if let Some(url) = feed_icon_url.filter(|u| !u.is_empty()) {
            if let Some(icon) = self.download(url, &options).await {
                return Some(icon);
            }
        }
        if let Some(url) = self.icon_from_page(&site, &options).await {
            if let Some(icon) = self.download(&url, &options).await {
                return Some(icon);
            }
        }
        let fallback = site.join("/favicon.ico").ok()?;
        self.download(fallback.as_str(), &options).await
    }

    async fn icon_from_page(&self, site: &Url, options: &RequestOptions) -> Option<String> {
        let response = self
            .fetcher
            .fetch(site.as_str(), options)
            .await
            .map_err(|e| debug!(url = %site, "Unable to fetch site for icon: {}", e))
            .ok()?;
        let html = String::from_utf8_lossy(&response.body);
        let href = find_icon_href(&html)?;
        let base = Url::parse(&response.effective_url).unwrap_or_else(|_| site.clone());
        base.join(&href).ok().map(String::from)
    }

    async fn download(&self, url: &str, options: &RequestOptions) -> Option<Icon> {
        let response = self
            .fetcher
            .fetch(url, options)
            .await
            .map_err(|e| debug!(url, "Unable to download icon: {}", e))
            .ok()?;
        let mime_type = match response.content_type.as_deref() {
            Some(ct) => {
                let ct = ct.split(';').next().unwrap_or(ct).trim().to_lowercase();
                if !ct.starts_with("image/") {
                    return None;
                }
                ct
            }
            None => mime_from_extension(url)?,
        };
        if response.body.is_empty() {
            return None;
        }
        Some(Icon::from_content(mime_type, response.body))
    }
}

/// `href` of the first `<link>` whose `rel` tokens include `icon`.
fn find_icon_href(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("link[rel][href]").ok()?;
    document.select(&selector).find_map(|link| {
        let element = link.value();
        let is_icon = element
            .attr("rel")?
            .split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case("icon"));
        let href = element.attr("href")?.trim();
        (is_icon && !href.is_empty()).then(|| href.to_string())
    })
}

fn mime_from_extension(url: &str) -> Option<String> {
    let path = Url::parse(url).ok()?.path().to_lowercase();
    let mime = match path.rsplit('.').next()? {
        "ico" => "image/x-icon",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::reader::fetcher::FetchResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StaticFetcher {
        pages: HashMap<String, (Option<&'static str>, Vec<u8>)>,
        requested: Mutex<Vec<String>>,
    }

    impl StaticFetcher {
        fn page(mut self, url: &str, content_type: Option<&'static str>, body: &[u8]) -> Self {
            self.pages.insert(url.to_string(), (content_type, body.to_vec()));
            self
        }
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(
            &self,
            url: &str,
            _options: &RequestOptions,
        ) -> Result<FetchResponse, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            let (content_type, body) = self
                .pages
                .get(url)
                .cloned()
                .ok_or(FetchError::ResourceNotFound(404))?;
            Ok(FetchResponse {
                content_type: content_type.map(str::to_string),
                ..FetchResponse::ok(url, body)
            })
        }
    }

    #[test]
    fn test_find_icon_href() {
        assert_eq!(
            find_icon_href(r#"<LINK REL='icon' HREF='/a.png'>"#).as_deref(),
            Some("/a.png")
        );
        assert_eq!(
            find_icon_href(r#"<link href=/b.ico rel="shortcut icon">"#).as_deref(),
            Some("/b.ico")
        );
        assert_eq!(find_icon_href(r#"<link rel="stylesheet" href="/c.css">"#), None);
        assert_eq!(find_icon_href(r#"<link rel="iconic" href="/d.png">"#), None);
        assert_eq!(
            find_icon_href(r#"<link rel="apple-touch-icon Icon" href=" /e.png ">"#).as_deref(),
            Some("/e.png")
        );
    }

    #[test]
    fn test_find_icon_href_ignores_markup_noise() {
        let html = r#"<html><head>
            <!-- <link rel="icon" href="/commented.png"> -->
            <script>var s = '<link rel="icon" href="/scripted.png">';</script>
            <link rel="icon" href="">
            <link
                href="/real.svg"
                type="image/svg+xml"
                rel="icon">
        </head></html>"#;
        assert_eq!(find_icon_href(html).as_deref(), Some("/real.svg"));
    }

    #[tokio::test]
    async fn test_feed_icon_preferred() {
        let fetcher = StaticFetcher::default().page(
            "https://example.com/icon.png",
            Some("image/png"),
            b"png",
        );
        let finder = IconFinder::new(Arc::new(fetcher));
        let icon = finder
            .find(
                "https://example.com/",
                Some("https://example.com/icon.png"),
                &RequestOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(icon.mime_type, "image/png");
        assert_eq!(icon.content, b"png");
    }

    #[tokio::test]
    async fn test_link_tag_in_page() {
        let html = br#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <link rel="shortcut icon" href="/static/fav.gif">
        </head></html>"#;
        let fetcher = StaticFetcher::default()
            .page("https://example.com/blog/", Some("text/html"), html)
            .page("https://example.com/static/fav.gif", None, b"gif");
        let finder = IconFinder::new(Arc::new(fetcher));
        let icon = finder
            .find("https://example.com/blog/", None, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(icon.mime_type, "image/gif");
    }

    #[tokio::test]
    async fn test_favicon_fallback() {
        let fetcher = Arc::new(StaticFetcher::default().page(
            "https://example.com/favicon.ico",
            Some("image/x-icon; charset=binary"),
            b"ico",
        ));
        let finder = IconFinder::new(fetcher.clone());
        let icon = finder
            .find("https://example.com/news/", None, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(icon.mime_type, "image/x-icon");
        assert_eq!(
            fetcher.requested.lock().unwrap().last().unwrap(),
            "https://example.com/favicon.ico"
        );
    }

    #[tokio::test]
    async fn test_non_image_is_rejected() {
        let fetcher = StaticFetcher::default().page(
            "https://example.com/favicon.ico",
            Some("text/html"),
            b"<html>not found</html>",
        );
        let finder = IconFinder::new(Arc::new(fetcher));
        assert!(finder
            .find("https://example.com/", None, &RequestOptions::default())
            .await
            .is_none());
    }
}

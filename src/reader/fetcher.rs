//! Conditional HTTP retrieval of feeds and icons.
//!
//! [`Fetcher`] is the seam used by the refresh pipeline; [`HttpFetcher`] is
//! the reqwest implementation. Every response carries the effective URL after
//! redirects, the cache validators, whether the document is unchanged, and a
//! refresh hint derived from the server's caching headers.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, CACHE_CONTROL, CONTENT_TYPE, COOKIE, ETAG, EXPIRES, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER, USER_AGENT,
};
use reqwest::{Client, Proxy};
use tracing::debug;

use crate::config::HttpClientConfig;
use crate::datetime::parse_http_date;
use crate::error::FetchError;
use crate::feed::Feed;

/// Per-request transport options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Overrides the configured user agent when non-empty.
    pub user_agent: String,
    pub cookie: String,
    pub username: String,
    pub password: String,
    /// Route the request through the configured proxy.
    pub use_proxy: bool,
    pub allow_self_signed_certificates: bool,
    /// Skip conditional request headers.
    pub ignore_http_cache: bool,
    /// Validators of the previously fetched document.
    pub etag: String,
    pub last_modified: String,
}

impl RequestOptions {
    /// Options for refreshing `feed`, including its stored validators.
    pub fn for_feed(feed: &Feed) -> Self {
        Self {
            user_agent: feed.user_agent.clone(),
            cookie: feed.cookie.clone(),
            username: feed.username.clone(),
            password: feed.password.clone(),
            use_proxy: feed.fetch_via_proxy,
            allow_self_signed_certificates: feed.allow_self_signed_certificates,
            ignore_http_cache: feed.ignore_http_cache,
            etag: feed.etag_header.clone(),
            last_modified: feed.last_modified_header.clone(),
        }
    }

    /// Same transport settings without cache validators.
    pub fn without_validators(&self) -> Self {
        Self {
            etag: String::new(),
            last_modified: String::new(),
            ..self.clone()
        }
    }
}

/// Outcome of a successful request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after following redirects.
    pub effective_url: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub etag: String,
    pub last_modified: String,
    /// The server reported the document unchanged.
    pub not_modified: bool,
    /// Server-advertised minimum delay before the next poll, in minutes.
    pub refresh_hint_minutes: Option<i64>,
}

impl FetchResponse {
    /// A plain 200 response, handy for alternative fetchers.
    pub fn ok(effective_url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            effective_url: effective_url.into(),
            body: body.into(),
            ..Default::default()
        }
    }
}

/// Retrieves remote documents.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &RequestOptions)
        -> Result<FetchResponse, FetchError>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    config: HttpClientConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }

    fn client(&self, options: &RequestOptions) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .timeout(self.config.timeout())
            .redirect(reqwest::redirect::Policy::limited(self.config.max_redirects))
            .danger_accept_invalid_certs(options.allow_self_signed_certificates);

        if options.use_proxy && !self.config.proxy.is_empty() {
            let proxy =
                Proxy::all(&self.config.proxy).map_err(|e| FetchError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }

        builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<FetchResponse, FetchError> {
        validate_url(url, self.config.block_private_networks)?;
        let client = self.client(options)?;

        let user_agent = if options.user_agent.is_empty() {
            &self.config.user_agent
        } else {
            &options.user_agent
        };
        let mut request = client.get(url).header(USER_AGENT, user_agent);
        if !options.cookie.is_empty() {
            request = request.header(COOKIE, &options.cookie);
        }
        if !options.username.is_empty() {
            request = request.basic_auth(&options.username, Some(&options.password));
        }
        let send_validators = !options.ignore_http_cache;
        if send_validators && !options.etag.is_empty() {
            request = request.header(IF_NONE_MATCH, &options.etag);
        }
        if send_validators && !options.last_modified.is_empty() {
            request = request.header(IF_MODIFIED_SINCE, &options.last_modified);
        }

        debug!(url, "Fetching");
        let mut response = request.send().await.map_err(classify_error)?;

        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let now = Utc::now();
        let headers = response.headers().clone();

        if status == 429 {
            return Err(FetchError::TooManyRequests {
                retry_after_minutes: header_str(&headers, RETRY_AFTER)
                    .and_then(|v| retry_after_minutes(v, now)),
            });
        }
        if let Some(err) = FetchError::from_status(status) {
            return Err(err);
        }

        let max_size = self.config.max_body_size_bytes();
        if response.content_length().is_some_and(|len| len > max_size) {
            return Err(FetchError::BodyTooLarge(max_size));
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_error)? {
            if (body.len() + chunk.len()) as u64 > max_size {
                return Err(FetchError::BodyTooLarge(max_size));
            }
            body.extend_from_slice(&chunk);
        }
        if status != 304 && body.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        // `Expires: 0` marks the validators as unusable.
        let expires_now = header_str(&headers, EXPIRES).is_some_and(|v| v.trim() == "0");
        let (etag, last_modified) = if expires_now {
            (String::new(), String::new())
        } else {
            (
                header_str(&headers, ETAG).unwrap_or_default().to_string(),
                header_str(&headers, LAST_MODIFIED)
                    .unwrap_or_default()
                    .to_string(),
            )
        };

        let not_modified = status == 304
            || (send_validators && !etag.is_empty() && etag == options.etag)
            || (send_validators && !last_modified.is_empty() && last_modified == options.last_modified);

        Ok(FetchResponse {
            status,
            effective_url,
            body,
            content_type: header_str(&headers, CONTENT_TYPE).map(str::to_string),
            etag,
            last_modified,
            not_modified,
            refresh_hint_minutes: refresh_hint_minutes(&headers, now),
        })
    }
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn classify_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        return FetchError::Timeout(e.to_string());
    }
    let detail = format!("{e:?}").to_lowercase();
    if detail.contains("certificate") || detail.contains("tls") || detail.contains("handshake") {
        return FetchError::Tls(e.to_string());
    }
    if e.is_builder() {
        return FetchError::InvalidUrl(e.to_string());
    }
    FetchError::Network(e.to_string())
}

fn seconds_to_minutes(seconds: i64) -> Option<i64> {
    (seconds > 0).then(|| seconds.saturating_add(59) / 60)
}

/// `Retry-After` as delta seconds or HTTP date.
pub fn retry_after_minutes(value: &str, now: DateTime<Utc>) -> Option<i64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return seconds_to_minutes(seconds);
    }
    parse_http_date(value).and_then(|at| seconds_to_minutes((at - now).num_seconds()))
}

/// `max-age` directive of a `Cache-Control` header.
pub fn max_age_minutes(value: &str) -> Option<i64> {
    value.split(',').find_map(|directive| {
        let (name, seconds) = directive.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        seconds_to_minutes(seconds.trim().trim_matches('"').parse().ok()?)
    })
}

/// Minutes until an `Expires` date.
pub fn expires_minutes(value: &str, now: DateTime<Utc>) -> Option<i64> {
    parse_http_date(value).and_then(|at| seconds_to_minutes((at - now).num_seconds()))
}

/// Largest refresh delay advertised by the response headers.
fn refresh_hint_minutes(headers: &HeaderMap, now: DateTime<Utc>) -> Option<i64> {
    [
        header_str(headers, RETRY_AFTER).and_then(|v| retry_after_minutes(v, now)),
        header_str(headers, CACHE_CONTROL).and_then(max_age_minutes),
        header_str(headers, EXPIRES).and_then(|v| expires_minutes(v, now)),
    ]
    .into_iter()
    .flatten()
    .max()
}

/// Check that a URL is fetchable.
///
/// Only http and https are accepted. With `block_private_networks`, hosts
/// resolving syntactically to loopback, private, link-local or reserved
/// ranges are refused as well.
pub fn validate_url(url: &str, block_private_networks: bool) -> Result<(), FetchError> {
    let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme {scheme}: {url}"
            )))
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| FetchError::InvalidUrl(format!("missing host: {url}")))?;
    if !block_private_networks {
        return Ok(());
    }

    let forbidden = match host {
        url::Host::Domain(domain) => is_forbidden_hostname(domain),
        url::Host::Ipv4(ip) => is_private_ip(&IpAddr::V4(ip)),
        url::Host::Ipv6(ip) => is_private_ip(&IpAddr::V6(ip)),
    };
    if forbidden {
        return Err(FetchError::InvalidUrl(format!("private address: {url}")));
    }
    Ok(())
}

fn is_forbidden_hostname(host: &str) -> bool {
    let host = host.to_lowercase();
    host == "localhost"
        || [".local", ".localhost", ".internal", ".lan"]
            .iter()
            .any(|suffix| host.ends_with(suffix))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

//! Error types for feedloom.

use thiserror::Error;

use crate::i18n::I18n;

/// Errors raised while retrieving a remote document.
///
/// These are transient from the scheduler's point of view: they are recorded
/// on the feed and the feed is retried at its next check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// DNS, connection or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// TLS handshake or certificate failure.
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP 401 unauthorized")]
    Unauthorized,

    #[error("HTTP 403 forbidden")]
    Forbidden,

    /// HTTP 429. Carries the server's Retry-After converted to minutes.
    #[error("HTTP 429 too many requests")]
    TooManyRequests { retry_after_minutes: Option<i64> },

    #[error("HTTP {0} resource not found")]
    ResourceNotFound(u16),

    #[error("HTTP 500 internal server error")]
    InternalServerError,

    #[error("HTTP 502 bad gateway")]
    BadGateway,

    #[error("HTTP 503 service unavailable")]
    ServiceUnavailable,

    #[error("HTTP 504 gateway timeout")]
    GatewayTimeout,

    #[error("unexpected HTTP status code {0}")]
    UnexpectedStatus(u16),

    #[error("empty response body")]
    EmptyBody,

    /// Body exceeded the configured maximum, in bytes.
    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be built (bad proxy, TLS setup, ...).
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    /// Map an HTTP status code to an error, or `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 | 304 => None,
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            404 | 410 => Some(Self::ResourceNotFound(status)),
            429 => Some(Self::TooManyRequests {
                retry_after_minutes: None,
            }),
            500 => Some(Self::InternalServerError),
            502 => Some(Self::BadGateway),
            503 => Some(Self::ServiceUnavailable),
            504 => Some(Self::GatewayTimeout),
            other => Some(Self::UnexpectedStatus(other)),
        }
    }

    /// Translation key of the user-facing message.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "error.network_timeout",
            Self::Network(_) => "error.network_operation",
            Self::Tls(_) => "error.tls_error",
            Self::Unauthorized => "error.http_not_authorized",
            Self::Forbidden => "error.http_forbidden",
            Self::TooManyRequests { .. } => "error.http_too_many_requests",
            Self::ResourceNotFound(_) => "error.http_resource_not_found",
            Self::InternalServerError => "error.http_internal_server_error",
            Self::BadGateway => "error.http_bad_gateway",
            Self::ServiceUnavailable => "error.http_service_unavailable",
            Self::GatewayTimeout => "error.http_gateway_timeout",
            Self::UnexpectedStatus(_) => "error.http_unexpected_status_code",
            Self::EmptyBody => "error.http_empty_response_body",
            Self::BodyTooLarge(_) => "error.http_response_too_large",
            Self::InvalidUrl(_) => "error.invalid_url",
            Self::Client(_) => "error.http_client_error",
        }
    }

    fn message_params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Timeout(e) | Self::Network(e) | Self::Tls(e) | Self::Client(e) => {
                vec![("error", e.clone())]
            }
            Self::InvalidUrl(url) => vec![("url", url.clone())],
            Self::ResourceNotFound(status) | Self::UnexpectedStatus(status) => {
                vec![("status", status.to_string())]
            }
            Self::BodyTooLarge(limit) => vec![("limit", limit.to_string())],
            _ => Vec::new(),
        }
    }
}

/// Common error type for feedloom.
#[derive(Error, Debug)]
pub enum FeedloomError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote document could not be retrieved.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// The user already subscribes to the resolved feed URL.
    #[error("feed already exists")]
    DuplicateFeed,

    /// The document is not a recognizable feed.
    #[error("unable to parse feed: {0}")]
    Parse(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    #[error("category not found")]
    CategoryNotFound,

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another refresh of the same feed is running.
    #[error("feed {0} is already being refreshed")]
    RefreshInProgress(i64),

    #[error("integration error: {0}")]
    Integration(String),

    /// The worker pool no longer accepts jobs.
    #[error("worker pool is shut down")]
    WorkerPoolClosed,
}

impl From<sqlx::Error> for FeedloomError {
    fn from(e: sqlx::Error) -> Self {
        FeedloomError::Database(e.to_string())
    }
}

impl FeedloomError {
    /// Translation key of the user-facing message.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Database(_) => "error.database_error",
            Self::Io(_) => "error.internal_error",
            Self::Fetch(e) => e.message_key(),
            Self::DuplicateFeed => "error.duplicated_feed",
            Self::Parse(_) => "error.unable_to_parse_feed",
            Self::NotFound(_) => "error.feed_not_found",
            Self::CategoryNotFound => "error.category_not_found",
            Self::Validation(_) => "error.invalid_filter_rule",
            Self::Config(_) => "error.internal_error",
            Self::RefreshInProgress(_) => "error.refresh_in_progress",
            Self::Integration(_) | Self::WorkerPoolClosed => "error.internal_error",
        }
    }

    fn message_params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Fetch(e) => e.message_params(),
            Self::Database(e)
            | Self::Parse(e)
            | Self::Validation(e)
            | Self::Config(e)
            | Self::Integration(e) => vec![("error", e.clone())],
            Self::Io(e) => vec![("error", e.to_string())],
            Self::WorkerPoolClosed => vec![("error", self.to_string())],
            _ => Vec::new(),
        }
    }

    /// Render the error in the given language.
    pub fn localize(&self, i18n: &I18n) -> String {
        let params = self.message_params();
        let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        i18n.t_with(self.message_key(), &params)
    }

    /// True for errors that should be stored on the feed as a parsing error.
    pub fn is_feed_error(&self) -> bool {
        !matches!(self, Self::RefreshInProgress(_))
    }
}

/// Result type alias for feedloom operations.
pub type Result<T> = std::result::Result<T, FeedloomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = FeedloomError::Validation("bad rule".to_string());
        assert_eq!(err.to_string(), "validation error: bad rule");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = FeedloomError::NotFound("feed".to_string());
        assert_eq!(err.to_string(), "feed not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FeedloomError = io_err.into();
        assert!(matches!(err, FeedloomError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_fetch_error_conversion() {
        let err: FeedloomError = FetchError::Forbidden.into();
        assert!(matches!(err, FeedloomError::Fetch(FetchError::Forbidden)));
        assert_eq!(err.message_key(), "error.http_forbidden");
    }

    #[test]
    fn test_from_status() {
        assert_eq!(FetchError::from_status(200), None);
        assert_eq!(FetchError::from_status(304), None);
        assert_eq!(FetchError::from_status(401), Some(FetchError::Unauthorized));
        assert_eq!(
            FetchError::from_status(410),
            Some(FetchError::ResourceNotFound(410))
        );
        assert_eq!(
            FetchError::from_status(429),
            Some(FetchError::TooManyRequests {
                retry_after_minutes: None
            })
        );
        assert_eq!(
            FetchError::from_status(418),
            Some(FetchError::UnexpectedStatus(418))
        );
    }

    #[test]
    fn test_localize_with_params() {
        let i18n = I18n::embedded("en").unwrap();
        let err = FeedloomError::Fetch(FetchError::UnexpectedStatus(418));
        assert_eq!(err.localize(&i18n), "Unexpected status code: 418.");

        let err = FeedloomError::Fetch(FetchError::Timeout("deadline".to_string()));
        assert!(err.localize(&i18n).contains("deadline"));
    }

    #[test]
    fn test_localize_japanese() {
        let i18n = I18n::embedded("ja").unwrap();
        let err = FeedloomError::DuplicateFeed;
        assert_eq!(err.localize(&i18n), "このフィードは既に存在します。");
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(FeedloomError::DuplicateFeed)
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}

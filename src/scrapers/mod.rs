//! Fetching: politeness gate, HTTP client, browser rendering and the
//! layered fetcher that escalates between them.

pub mod browser;
pub mod fetcher;
pub mod http_client;
pub mod rate_limiter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use browser::{BrowserEngineConfig, BrowserFetcher, RenderedPage};
pub use fetcher::{
    needs_rendering, visible_text_chars, BrowserMode, FetchStrategy, LayeredFetcher,
    RenderedStrategy, StaticStrategy, DEFAULT_MIN_HTML_CHARS,
};
pub use http_client::{HttpClient, RetryPolicy, DEFAULT_USER_AGENT};
pub use rate_limiter::{Admission, GateConfig, PolitenessGate, PolitenessViolation};

use crate::utils::{mime_type_category, MimeCategory};

/// Errors from fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network error, timeout, throttling or 5xx. Worth retrying.
    #[error("transient failure fetching {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    /// 4xx other than throttling. Not retried.
    #[error("permanent failure fetching {url}: HTTP {status}")]
    Permanent { url: String, status: u16 },

    #[error("disallowed by robots.txt: {url}")]
    Disallowed { url: String },

    #[error("gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("browser fetch failed for {url}: {reason}")]
    Browser { url: String, reason: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Politeness(#[from] PolitenessViolation),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(url: &str, status: u16) -> Self {
        if status == 408 || status == 429 || status >= 500 {
            FetchError::Transient {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
                status: Some(status),
            }
        } else {
            FetchError::Permanent {
                url: url.to_string(),
                status,
            }
        }
    }

    pub fn transient(url: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Transient {
            url: url.to_string(),
            reason: err.to_string(),
            status: None,
        }
    }
}

/// Bytes retrieved for a URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL as requested.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Effective MIME type (sniffed, not just the header).
    pub mime: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// True when produced by the browser instead of a plain GET.
    pub rendered: bool,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn category(&self) -> MimeCategory {
        mime_type_category(&self.mime)
    }

    pub fn is_html(&self) -> bool {
        self.category() == MimeCategory::Html
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Anything that can turn a URL into bytes.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(FetchError::from_status("u", 503).is_retryable());
        assert!(FetchError::from_status("u", 429).is_retryable());
        assert!(FetchError::from_status("u", 408).is_retryable());
        assert!(!FetchError::from_status("u", 404).is_retryable());
        assert!(!FetchError::from_status("u", 403).is_retryable());
        assert!(matches!(
            FetchError::from_status("u", 410),
            FetchError::Permanent { status: 410, .. }
        ));
    }

    #[test]
    fn test_disallowed_not_retryable() {
        let err = FetchError::Disallowed {
            url: "https://a.gov/private".to_string(),
        };
        assert!(!err.is_retryable());
    }
}

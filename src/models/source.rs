//! Crawl source model.

use serde::{Deserialize, Serialize};

/// Name of the synthetic source that owns URLs from the seed file.
pub const SEED_SOURCE_NAME: &str = "seeds";

/// How a source expands into candidate URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// A landing page whose in-scope links are followed one level deep.
    HtmlHub,
    /// An RSS or Atom feed whose items are the candidates.
    Feed,
    /// A sitemap index or urlset.
    Sitemap,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HtmlHub => "html-hub",
            Self::Feed => "feed",
            Self::Sitemap => "sitemap",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "html-hub" | "html_hub" | "hub" | "html" => Some(Self::HtmlHub),
            "feed" | "rss" | "atom" => Some(Self::Feed),
            "sitemap" => Some(Self::Sitemap),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crawl target.
///
/// Created from the source catalogue. The pipeline only ever reads sources;
/// `active` is the one attribute that changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Database row ID (0 until persisted).
    pub id: i32,
    /// Jurisdiction tag, e.g. `TX`.
    pub state: String,
    /// Display name, unique within a state.
    pub name: String,
    /// Root URL.
    pub url: String,
    /// Regex restricting which discovered links are in scope.
    pub allow_pattern: Option<String>,
    pub source_type: SourceType,
    pub feed_url: Option<String>,
    pub sitemap_url: Option<String>,
    pub active: bool,
}

impl Source {
    /// Create an active source with no allow-pattern or auxiliary URLs.
    pub fn new(state: &str, name: &str, url: &str, source_type: SourceType) -> Self {
        Self {
            id: 0,
            state: state.trim().to_uppercase(),
            name: name.trim().to_string(),
            url: url.trim().to_string(),
            allow_pattern: None,
            source_type,
            feed_url: None,
            sitemap_url: None,
            active: true,
        }
    }

    pub fn with_allow_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.allow_pattern = Some(pattern.into());
        self
    }

    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = Some(url.into());
        self
    }

    pub fn with_sitemap_url(mut self, url: impl Into<String>) -> Self {
        self.sitemap_url = Some(url.into());
        self
    }

    /// Whether this is the synthetic seed-file source.
    pub fn is_seed_list(&self) -> bool {
        self.name == SEED_SOURCE_NAME
    }

    /// `STATE/name` label used in logs and summaries.
    pub fn label(&self) -> String {
        if self.state.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.state, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_aliases() {
        assert_eq!(SourceType::from_str("hub"), Some(SourceType::HtmlHub));
        assert_eq!(SourceType::from_str("RSS"), Some(SourceType::Feed));
        assert_eq!(SourceType::from_str("sitemap"), Some(SourceType::Sitemap));
        assert_eq!(SourceType::from_str("ftp"), None);
        assert_eq!(SourceType::HtmlHub.as_str(), "html-hub");
    }

    #[test]
    fn test_new_source_normalizes_state() {
        let src = Source::new(" tx ", "Comptroller News", "https://comptroller.texas.gov/", SourceType::HtmlHub);
        assert_eq!(src.state, "TX");
        assert_eq!(src.label(), "TX/Comptroller News");
        assert!(src.active);
    }
}

//! Link discovery on hub pages.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::DiscoveryError;
use crate::models::Source;
use crate::utils::{extract_domain, normalize_url};

static JUNK_PATHS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/careers?(/|$)|/jobs?(/|$)|/about(-us)?(/|$)|/privacy(-policy)?(/|$)|/terms(-of-service)?(/|$)|/social|/facebook|/twitter|/linkedin",
    )
    .unwrap()
});

const JUNK_SCHEMES: &[&str] = &["mailto:", "tel:", "javascript:", "data:"];

/// Which links a source considers in scope.
#[derive(Debug, Clone)]
pub enum LinkScope {
    /// Links matching the source's allow-pattern.
    Pattern(Regex),
    /// Links on the same host as the root URL.
    SameHost(String),
}

impl LinkScope {
    pub fn for_source(source: &Source) -> Result<Self, DiscoveryError> {
        match source.allow_pattern.as_deref().map(str::trim) {
            Some(pattern) if !pattern.is_empty() => Ok(Self::Pattern(Regex::new(pattern)?)),
            _ => Ok(Self::SameHost(
                extract_domain(&source.url).unwrap_or_default(),
            )),
        }
    }

    pub fn allows(&self, url: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(url),
            Self::SameHost(host) => extract_domain(url).as_deref() == Some(host.as_str()),
        }
    }
}

/// Links that never lead to bulletins.
pub fn is_junk(href: &str) -> bool {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return true;
    }
    let lower = href.to_lowercase();
    if JUNK_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return true;
    }
    match Url::parse(href) {
        Ok(u) => JUNK_PATHS.is_match(u.path()),
        Err(_) => JUNK_PATHS.is_match(href),
    }
}

/// In-scope `<a href>` links of a hub page, resolved against `base_url`,
/// normalized, deduplicated and capped at `max`.
pub fn discover_links(html: &str, base_url: &str, scope: &LinkScope, max: usize) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let own = normalize_url(base_url);

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for href in document.select(&selector).filter_map(|a| a.value().attr("href")) {
        if links.len() >= max {
            break;
        }
        if is_junk(href) {
            continue;
        }
        let Some(url) = base.join(href.trim()).ok().and_then(|u| normalize_url(u.as_str())) else {
            continue;
        };
        if is_junk(&url) || own.as_deref() == Some(url.as_str()) || !scope.allows(&url) {
            continue;
        }
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }

    links
}

/// RSS/Atom feeds advertised via `<link rel="alternate">`.
pub fn feed_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse(r#"link[rel="alternate"][href]"#) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut feeds = Vec::new();
    for link in document.select(&selector) {
        let kind = link.value().attr("type").unwrap_or_default().to_lowercase();
        if kind != "application/rss+xml" && kind != "application/atom+xml" {
            continue;
        }
        if let Some(url) = link
            .value()
            .attr("href")
            .and_then(|h| base.join(h.trim()).ok())
            .and_then(|u| normalize_url(u.as_str()))
        {
            if !feeds.contains(&url) {
                feeds.push(url);
            }
        }
    }
    feeds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    const HUB: &str = r##"<html><head>
<link rel="alternate" type="application/rss+xml" href="/news/feed.xml">
<link rel="stylesheet" href="/style.css">
</head><body>
<nav><a href="/about-us">About</a><a href="/careers/">Careers</a></nav>
<a href="/news/bulletin-1">Bulletin 1</a>
<a href="/news/bulletin-1#section">Bulletin 1 again</a>
<a href="news/bulletin-2">Bulletin 2</a>
<a href="https://other.gov/news/x">Elsewhere</a>
<a href="mailto:help@tax.gov">Mail</a>
<a href="#top">Top</a>
<a href="/">Home</a>
</body></html>"##;

    #[test]
    fn test_discover_links_same_host() {
        let source = Source::new("TX", "News", "https://tax.gov/", SourceType::HtmlHub);
        let scope = LinkScope::for_source(&source).unwrap();
        let links = discover_links(HUB, "https://tax.gov/", &scope, 200);
        assert_eq!(
            links,
            vec!["https://tax.gov/news/bulletin-1", "https://tax.gov/news/bulletin-2"]
        );
    }

    #[test]
    fn test_discover_links_pattern_and_cap() {
        let source = Source::new("TX", "News", "https://tax.gov/", SourceType::HtmlHub)
            .with_allow_pattern(r"/news/");
        let scope = LinkScope::for_source(&source).unwrap();

        let links = discover_links(HUB, "https://tax.gov/", &scope, 200);
        assert!(links.contains(&"https://other.gov/news/x".to_string()));

        let capped = discover_links(HUB, "https://tax.gov/", &scope, 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let source = Source::new("TX", "News", "https://tax.gov/", SourceType::HtmlHub)
            .with_allow_pattern("([");
        assert!(LinkScope::for_source(&source).is_err());
    }

    #[test]
    fn test_junk() {
        assert!(is_junk("mailto:a@b.gov"));
        assert!(is_junk("JavaScript:void(0)"));
        assert!(is_junk("#main"));
        assert!(is_junk("https://tax.gov/privacy-policy"));
        assert!(is_junk("https://tax.gov/jobs/"));
        assert!(!is_junk("https://tax.gov/news/about-the-change"));
    }

    #[test]
    fn test_feed_links() {
        assert_eq!(
            feed_links(HUB, "https://tax.gov/"),
            vec!["https://tax.gov/news/feed.xml"]
        );
    }
}

//! Robots.txt parser and per-origin cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use url::Url;

use crate::scrapers::http_client::robots_token;
use crate::scrapers::{PageFetcher, PolitenessGate};

/// Declared crawl-delays above this are clamped to it.
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    groups: Vec<Group>,
    sitemaps: Vec<String>,
}

/// One `User-agent` block.
#[derive(Debug, Clone, Default)]
struct Group {
    /// Lowercased agent names.
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    pattern: String,
}

impl RobotsTxt {
    /// Rules that allow everything, used when robots.txt is unavailable.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt content.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current = Group::default();
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // An agent line after rules starts a new group.
                    if in_rules {
                        robots.groups.push(std::mem::take(&mut current));
                        in_rules = false;
                    }
                    current.agents.push(value.to_lowercase());
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current.rules.push(Rule {
                            allow: directive == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                "crawl-delay" => {
                    in_rules = true;
                    if let Some(delay) = parse_crawl_delay(value) {
                        current.crawl_delay = Some(delay);
                    }
                }
                "sitemap" => {
                    if !value.is_empty() {
                        robots.sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        if !current.agents.is_empty() {
            robots.groups.push(current);
        }
        robots
    }

    /// Groups that apply to `user_agent`: the most specific named group,
    /// otherwise `*`.
    fn groups_for(&self, user_agent: &str) -> Vec<&Group> {
        let token = robots_token(user_agent);

        let best = self
            .groups
            .iter()
            .flat_map(|g| g.agents.iter())
            .filter(|a| a.as_str() != "*" && !a.is_empty())
            .filter(|a| **a == token || a.starts_with(token.as_str()))
            .max_by_key(|a| a.len());

        let wanted = best.map(String::as_str).unwrap_or("*");
        self.groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a == wanted))
            .collect()
    }

    /// Check if a path (with query) is allowed for a user agent.
    ///
    /// The longest matching pattern decides; Allow wins ties.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        if path == "/robots.txt" {
            return true;
        }

        let mut verdict: Option<(usize, bool)> = None;
        for group in self.groups_for(user_agent) {
            for rule in &group.rules {
                if !pattern_matches(&rule.pattern, path) {
                    continue;
                }
                let len = rule.pattern.len();
                verdict = match verdict {
                    Some((best, allow)) if best > len || (best == len && allow) => {
                        Some((best, allow))
                    }
                    _ => Some((len, rule.allow)),
                };
            }
        }
        verdict.map_or(true, |(_, allow)| allow)
    }

    /// Check a full URL.
    pub fn is_url_allowed(&self, user_agent: &str, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => self.is_allowed(user_agent, &path_and_query(&parsed)),
            Err(_) => false,
        }
    }

    /// Crawl delay declared for a user agent.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.groups_for(user_agent)
            .iter()
            .find_map(|g| g.crawl_delay)
    }

    /// Disallow patterns that apply to a user agent.
    pub fn disallow_rules(&self, user_agent: &str) -> Vec<String> {
        self.groups_for(user_agent)
            .iter()
            .flat_map(|g| g.rules.iter())
            .filter(|r| !r.allow)
            .map(|r| r.pattern.clone())
            .collect()
    }

    /// Sitemaps listed in robots.txt.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }
}

/// Match a robots pattern (`*` wildcard, trailing `$` anchor) against a path.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    if parts.is_empty() {
        return !anchored || rest.is_empty();
    }

    for (i, part) in parts.iter().enumerate() {
        if anchored && i == parts.len() - 1 {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

/// `scheme://host[:port]` of a URL.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

/// Parse a `Crawl-delay` value in seconds, clamped to [`MAX_CRAWL_DELAY`].
fn parse_crawl_delay(value: &str) -> Option<Duration> {
    let secs = value.parse::<f64>().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(delay) if delay <= MAX_CRAWL_DELAY => Some(delay),
        _ => {
            warn!(
                "Crawl-delay {} exceeds {:?}, clamping",
                value, MAX_CRAWL_DELAY
            );
            Some(MAX_CRAWL_DELAY)
        }
    }
}

/// Fetches robots.txt once per origin and feeds crawl-delays to the gate.
pub struct RobotsCache {
    fetcher: Arc<dyn PageFetcher>,
    gate: Option<PolitenessGate>,
    user_agent: String,
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<RobotsTxt>>>>>,
}

impl RobotsCache {
    pub fn new(fetcher: Arc<dyn PageFetcher>, user_agent: &str) -> Self {
        Self {
            fetcher,
            gate: None,
            user_agent: user_agent.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Push each domain's crawl-delay into `gate` when first seen.
    pub fn with_gate(mut self, gate: PolitenessGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Rules for the URL's origin. A failed fetch yields allow-all.
    pub async fn get(&self, url: &str) -> Arc<RobotsTxt> {
        let Some(origin) = origin_of(url) else {
            return Arc::new(RobotsTxt::allow_all());
        };

        let cell = self
            .entries
            .lock()
            .await
            .entry(origin.clone())
            .or_default()
            .clone();

        cell.get_or_init(|| self.load(origin)).await.clone()
    }

    async fn load(&self, origin: String) -> Arc<RobotsTxt> {
        let robots_url = format!("{}/robots.txt", origin);
        let robots = match self.fetcher.fetch(&robots_url).await {
            Ok(page) => RobotsTxt::parse(&page.text()),
            Err(e) => {
                debug!("No robots.txt at {} ({}), allowing all", robots_url, e);
                RobotsTxt::allow_all()
            }
        };

        if let (Some(gate), Some(domain)) = (&self.gate, crate::utils::extract_domain(&origin)) {
            gate.set_crawl_delay(&domain, robots.crawl_delay(&self.user_agent))
                .await;
        }
        Arc::new(robots)
    }

    pub async fn is_allowed(&self, url: &str) -> bool {
        self.get(url).await.is_url_allowed(&self.user_agent, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::http_client::page_from_parts;
    use crate::scrapers::{FetchError, FetchedPage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UA: &str = "bulletin-monitor/0.2";

    #[test]
    fn test_parse_basic() {
        let content = r#"
User-agent: *
Disallow: /admin/
Disallow: /private
Allow: /admin/public/
Crawl-delay: 1.5

Sitemap: https://example.gov/sitemap.xml
"#;
        let robots = RobotsTxt::parse(content);

        assert!(robots.is_allowed(UA, "/"));
        assert!(robots.is_allowed(UA, "/page"));
        assert!(!robots.is_allowed(UA, "/admin/"));
        assert!(!robots.is_allowed(UA, "/admin/secret"));
        assert!(robots.is_allowed(UA, "/admin/public/page"));
        assert!(!robots.is_allowed(UA, "/private"));
        assert!(!robots.is_allowed(UA, "/private/page"));

        assert_eq!(robots.crawl_delay(UA), Some(Duration::from_millis(1500)));
        assert_eq!(robots.sitemaps(), ["https://example.gov/sitemap.xml"]);
    }

    #[test]
    fn test_specific_agent_group_wins() {
        let content = r#"
User-agent: *
Disallow: /

User-agent: bulletin-monitor
Disallow: /drafts
Crawl-delay: 2
"#;
        let robots = RobotsTxt::parse(content);

        assert!(robots.is_allowed(UA, "/news"));
        assert!(!robots.is_allowed(UA, "/drafts/1"));
        assert!(!robots.is_allowed("OtherBot/1.0", "/news"));
        assert_eq!(robots.crawl_delay(UA), Some(Duration::from_secs(2)));
        assert_eq!(robots.crawl_delay("OtherBot/1.0"), None);
    }

    #[test]
    fn test_oversized_crawl_delay_is_clamped() {
        for value in ["1e20", "inf", "86400"] {
            let robots = RobotsTxt::parse(&format!("User-agent: *\nCrawl-delay: {}\n", value));
            assert_eq!(robots.crawl_delay(UA), Some(MAX_CRAWL_DELAY), "{}", value);
        }
        let robots = RobotsTxt::parse("User-agent: *\nCrawl-delay: -3\nCrawl-delay: NaN\n");
        assert_eq!(robots.crawl_delay(UA), None);
    }

    #[test]
    fn test_grouped_agents_share_rules() {
        let content = "User-agent: a\nUser-agent: *\nDisallow: /x\n";
        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed(UA, "/x"));
    }

    #[test]
    fn test_longest_match_and_ties() {
        let content = "User-agent: *\nDisallow: /news\nAllow: /news/bulletins\nAllow: /a\nDisallow: /a\n";
        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed(UA, "/news/archive"));
        assert!(robots.is_allowed(UA, "/news/bulletins/2024"));
        assert!(robots.is_allowed(UA, "/a/b"));
    }

    #[test]
    fn test_wildcards() {
        let content = "User-agent: *\nDisallow: /*.pdf$\nDisallow: /search*q=\n";
        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed(UA, "/forms/st-3.pdf"));
        assert!(robots.is_allowed(UA, "/forms/st-3.pdf?download=1"));
        assert!(!robots.is_allowed(UA, "/search?q=tax"));
        assert!(robots.is_allowed(UA, "/search"));
    }

    #[test]
    fn test_empty_disallow_allows_everything() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow:\n");
        assert!(robots.is_allowed(UA, "/anything"));
        assert!(robots.disallow_rules(UA).is_empty());
    }

    #[test]
    fn test_url_check_includes_query() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /*?print=\n");
        assert!(!robots.is_url_allowed(UA, "https://a.gov/n?print=1"));
        assert!(robots.is_url_allowed(UA, "https://a.gov/n"));
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://Tax.GOV/a/b?c").as_deref(),
            Some("https://tax.gov")
        );
        assert_eq!(
            origin_of("http://localhost:8080/x").as_deref(),
            Some("http://localhost:8080")
        );
    }

    struct RobotsServer {
        body: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for RobotsServer {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.body {
                Some(body) => Ok(page_from_parts(
                    url,
                    url,
                    200,
                    Some("text/plain".to_string()),
                    body.as_bytes().to_vec(),
                    false,
                )),
                None => Err(FetchError::Permanent {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_cache_fetches_once_and_sets_delay() {
        let server = Arc::new(RobotsServer {
            body: Some("User-agent: *\nCrawl-delay: 2\nDisallow: /private\n"),
            calls: AtomicUsize::new(0),
        });
        let gate = PolitenessGate::new();
        let cache = RobotsCache::new(server.clone(), UA).with_gate(gate.clone());

        assert!(cache.is_allowed("https://a.gov/news").await);
        assert!(!cache.is_allowed("https://a.gov/private/x").await);
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);

        let stats = gate.stats().await;
        assert_eq!(stats["a.gov"].interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let server = Arc::new(RobotsServer {
            body: None,
            calls: AtomicUsize::new(0),
        });
        let cache = RobotsCache::new(server, UA);
        assert!(cache.is_allowed("https://a.gov/anything").await);
    }
}

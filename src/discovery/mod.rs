//! Expanding sources into candidate URLs.
//!
//! The [`Resolver`] reads a domain's robots rules and, depending on the source
//! type, its sitemap or feed. Hub pages expand to their root URL here; their
//! links are discovered after the hub itself has been fetched.

pub mod catalogue;
pub mod feed;
pub mod hub;
pub mod robots;
pub mod sitemap;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

pub use catalogue::{load_catalogue, load_seeds, parse_catalogue, parse_seeds, seed_source};
pub use feed::parse_feed;
pub use hub::{discover_links, feed_links, is_junk, LinkScope};
pub use robots::{origin_of, RobotsCache, RobotsTxt};
pub use sitemap::{flatten_sitemap, parse_sitemap, SitemapDoc};

use crate::models::{Source, SourceType};
use crate::scrapers::{FetchError, PageFetcher};
use crate::utils::normalize_url;

/// Default depth limit for nested sitemap indexes.
pub const DEFAULT_MAX_SITEMAP_DEPTH: usize = 2;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("could not parse {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("invalid allow pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("catalogue error: {0}")]
    Catalogue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a source expands to.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub crawl_delay: Option<Duration>,
    pub rules: Arc<RobotsTxt>,
    /// Normalized, deduplicated, robots-allowed URLs in discovery order.
    pub candidate_urls: Vec<String>,
}

impl Resolution {
    pub fn disallow_rules(&self, user_agent: &str) -> Vec<String> {
        self.rules.disallow_rules(user_agent)
    }
}

/// Resolves sources into candidate URLs.
pub struct Resolver {
    fetcher: Arc<dyn PageFetcher>,
    robots: Arc<RobotsCache>,
    max_sitemap_depth: usize,
}

impl Resolver {
    pub fn new(fetcher: Arc<dyn PageFetcher>, robots: Arc<RobotsCache>) -> Self {
        Self {
            fetcher,
            robots,
            max_sitemap_depth: DEFAULT_MAX_SITEMAP_DEPTH,
        }
    }

    pub fn with_max_sitemap_depth(mut self, depth: usize) -> Self {
        self.max_sitemap_depth = depth.max(1);
        self
    }

    pub fn robots(&self) -> &Arc<RobotsCache> {
        &self.robots
    }

    pub async fn resolve(&self, source: &Source) -> Result<Resolution, DiscoveryError> {
        let rules = self.robots.get(&source.url).await;
        let crawl_delay = rules.crawl_delay(self.robots.user_agent());

        let raw = match source.source_type {
            SourceType::HtmlHub => vec![source.url.clone()],
            SourceType::Feed => {
                let feed_url = source.feed_url.as_deref().unwrap_or(&source.url);
                self.feed_items(feed_url).await?
            }
            SourceType::Sitemap => self.sitemap_pages(source, &rules).await?,
        };

        let pattern = match source.source_type {
            SourceType::HtmlHub => None,
            _ => match source.allow_pattern.as_deref().map(str::trim) {
                Some(p) if !p.is_empty() => Some(regex::Regex::new(p)?),
                _ => None,
            },
        };

        let candidate_urls = self.filter_candidates(raw, pattern.as_ref()).await;
        info!(
            "Resolved {} ({}) to {} candidate URLs",
            source.label(),
            source.source_type,
            candidate_urls.len()
        );

        Ok(Resolution {
            crawl_delay,
            rules,
            candidate_urls,
        })
    }

    /// Item links of a feed.
    pub async fn feed_items(&self, feed_url: &str) -> Result<Vec<String>, DiscoveryError> {
        let page = self.fetcher.fetch(feed_url).await?;
        parse_feed(&page.text()).map_err(|reason| DiscoveryError::Parse {
            url: feed_url.to_string(),
            reason,
        })
    }

    async fn sitemap_pages(
        &self,
        source: &Source,
        rules: &RobotsTxt,
    ) -> Result<Vec<String>, DiscoveryError> {
        let roots: Vec<String> = match source.sitemap_url {
            Some(ref url) => vec![url.clone()],
            None if !rules.sitemaps().is_empty() => rules.sitemaps().to_vec(),
            None => {
                let origin = origin_of(&source.url).unwrap_or_default();
                vec![format!("{}/sitemap.xml", origin)]
            }
        };

        let mut pages = Vec::new();
        let mut last_err = None;
        let mut any_ok = false;
        for root in &roots {
            debug!("Expanding sitemap {} for {}", root, source.label());
            match flatten_sitemap(self.fetcher.as_ref(), root, self.max_sitemap_depth).await {
                Ok(found) => {
                    any_ok = true;
                    pages.extend(found);
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) if !any_ok => Err(e),
            _ => Ok(pages),
        }
    }

    async fn filter_candidates(
        &self,
        raw: Vec<String>,
        pattern: Option<&regex::Regex>,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for url in raw {
            let Some(url) = normalize_url(&url) else {
                debug!("Dropping unparseable candidate {}", url);
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }
            if pattern.is_some_and(|p| !p.is_match(&url)) {
                continue;
            }
            if !self.robots.is_allowed(&url).await {
                debug!("Dropping {} (disallowed by robots.txt)", url);
                continue;
            }
            out.push(url);
        }
        out
    }
}

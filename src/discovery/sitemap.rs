//! Sitemap parsing (index and urlset) and bounded flattening.

use std::collections::HashSet;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use super::DiscoveryError;
use crate::scrapers::PageFetcher;

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDoc {
    /// `<sitemapindex>`: nested sitemap URLs.
    Index(Vec<String>),
    /// `<urlset>`: page URLs.
    UrlSet(Vec<String>),
}

impl SitemapDoc {
    pub fn locs(&self) -> &[String] {
        match self {
            Self::Index(locs) | Self::UrlSet(locs) => locs,
        }
    }
}

/// Parse sitemap XML, detecting index vs urlset from the root element.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDoc, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root: Option<Vec<u8>> = None;
    let mut locs = Vec::new();
    let mut in_entry = false;
    let mut in_loc = false;
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if root.is_none() {
                    root = Some(name);
                    continue;
                }
                match name.as_slice() {
                    b"sitemap" | b"url" => in_entry = true,
                    b"loc" if in_entry => {
                        in_loc = true;
                        current.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_loc => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                current.push_str(&text);
            }
            Ok(Event::CData(e)) if in_loc => {
                current.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref().to_ascii_lowercase().as_slice() {
                b"loc" if in_loc => {
                    in_loc = false;
                    let loc = current.trim();
                    if !loc.is_empty() {
                        locs.push(loc.to_string());
                    }
                }
                b"sitemap" | b"url" => in_entry = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    match root.as_deref() {
        Some(b"sitemapindex") => Ok(SitemapDoc::Index(locs)),
        Some(b"urlset") => Ok(SitemapDoc::UrlSet(locs)),
        Some(other) => Err(format!(
            "unexpected root element <{}>",
            String::from_utf8_lossy(other)
        )),
        None => Err("empty document".to_string()),
    }
}

/// Fetch `root` and flatten nested indexes into the union of page URLs.
///
/// Depth 1 is the root document. Indexes deeper than `max_depth` are not
/// followed, and each sitemap is fetched at most once. A failure on the
/// root is an error; failures on nested sitemaps are logged and skipped.
pub async fn flatten_sitemap(
    fetcher: &dyn PageFetcher,
    root: &str,
    max_depth: usize,
) -> Result<Vec<String>, DiscoveryError> {
    let mut pages = Vec::new();
    let mut seen_pages = HashSet::new();
    let mut visited = HashSet::new();
    let mut pending = vec![(root.to_string(), 1usize)];

    while let Some((sitemap_url, depth)) = pending.pop() {
        if !visited.insert(sitemap_url.clone()) {
            continue;
        }
        debug!("Fetching sitemap {} (depth {})", sitemap_url, depth);

        let doc = match fetch_sitemap(fetcher, &sitemap_url).await {
            Ok(doc) => doc,
            Err(e) if sitemap_url == root => return Err(e),
            Err(e) => {
                warn!("Skipping nested sitemap {}: {}", sitemap_url, e);
                continue;
            }
        };

        match doc {
            SitemapDoc::UrlSet(locs) => {
                for loc in locs {
                    if seen_pages.insert(loc.clone()) {
                        pages.push(loc);
                    }
                }
            }
            SitemapDoc::Index(children) if depth < max_depth => {
                // Reverse so children are visited in document order.
                for child in children.into_iter().rev() {
                    if !visited.contains(&child) {
                        pending.push((child, depth + 1));
                    }
                }
            }
            SitemapDoc::Index(children) => {
                warn!(
                    "Sitemap index {} at depth {} not followed ({} children)",
                    sitemap_url,
                    depth,
                    children.len()
                );
            }
        }
    }

    Ok(pages)
}

async fn fetch_sitemap(fetcher: &dyn PageFetcher, url: &str) -> Result<SitemapDoc, DiscoveryError> {
    let page = fetcher.fetch(url).await?;
    parse_sitemap(&page.text()).map_err(|reason| DiscoveryError::Parse {
        url: url.to_string(),
        reason,
    })
}

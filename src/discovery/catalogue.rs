//! Source catalogue (YAML) and seed-file loading.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::DiscoveryError;
use crate::models::{Source, SourceType, SEED_SOURCE_NAME};
use crate::utils::{clean_url, normalize_url};

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    states: Vec<StateEntry>,
}

#[derive(Debug, Deserialize)]
struct StateEntry {
    code: String,
    #[serde(default)]
    hubs: Vec<HubEntry>,
}

#[derive(Debug, Deserialize)]
struct HubEntry {
    name: String,
    url: String,
    #[serde(default)]
    allow_re: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    feed_url: Option<String>,
    #[serde(default)]
    sitemap_url: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// Parse a sources catalogue.
pub fn parse_catalogue(yaml: &str) -> Result<Vec<Source>, DiscoveryError> {
    let file: CatalogueFile =
        serde_yaml::from_str(yaml).map_err(|e| DiscoveryError::Catalogue(e.to_string()))?;

    let mut sources = Vec::new();
    for state in file.states {
        for hub in state.hubs {
            let source_type = match hub.kind.as_deref() {
                None => SourceType::HtmlHub,
                Some(kind) => SourceType::from_str(kind).ok_or_else(|| {
                    DiscoveryError::Catalogue(format!(
                        "{}/{}: unknown source type '{}'",
                        state.code, hub.name, kind
                    ))
                })?,
            };

            let url = clean_url(&hub.url);
            if normalize_url(&url).is_none() {
                return Err(DiscoveryError::Catalogue(format!(
                    "{}/{}: invalid url '{}'",
                    state.code, hub.name, hub.url
                )));
            }

            let mut source = Source::new(&state.code, &hub.name, &url, source_type);
            source.active = hub.active;
            if let Some(pattern) = hub.allow_re.filter(|p| !p.trim().is_empty()) {
                regex::Regex::new(&pattern)?;
                source = source.with_allow_pattern(pattern);
            }
            if let Some(feed) = hub.feed_url.map(|u| clean_url(&u)).filter(|u| !u.is_empty()) {
                source = source.with_feed_url(feed);
            }
            if let Some(sm) = hub.sitemap_url.map(|u| clean_url(&u)).filter(|u| !u.is_empty()) {
                source = source.with_sitemap_url(sm);
            }
            sources.push(source);
        }
    }
    Ok(sources)
}

pub fn load_catalogue(path: &Path) -> Result<Vec<Source>, DiscoveryError> {
    let content = std::fs::read_to_string(path)?;
    parse_catalogue(&content)
}

/// Parse a seed list: one URL per line, `#` comments, BOM tolerated.
///
/// Invalid lines are skipped with a warning; duplicates are dropped.
pub fn parse_seeds(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let cleaned = clean_url(line);
        if cleaned.is_empty() {
            continue;
        }
        match normalize_url(&cleaned) {
            Some(url) => {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
            None => warn!("Skipping invalid seed on line {}: {}", lineno + 1, line.trim()),
        }
    }
    urls
}

pub fn load_seeds(path: &Path) -> Result<Vec<String>, DiscoveryError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_seeds(&content))
}

/// The synthetic source that owns seed-file URLs.
pub fn seed_source() -> Source {
    Source::new("", SEED_SOURCE_NAME, "", SourceType::HtmlHub)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGUE: &str = r#"
states:
  - code: tx
    hubs:
      - name: Tax Policy News
        url: https://comptroller.texas.gov/taxes/publications/
        allow_re: "comptroller\\.texas\\.gov/taxes/"
        type: hub
  - code: NY
    hubs:
      - name: Bulletins
        url: https://www.tax.ny.gov/
        type: rss
        feed_url: https://www.tax.ny.gov/rss/bulletins.xml
      - name: Sitemap
        url: https://www.tax.ny.gov/
        type: sitemap
        active: false
"#;

    #[test]
    fn test_parse_catalogue() {
        let sources = parse_catalogue(CATALOGUE).unwrap();
        assert_eq!(sources.len(), 3);

        assert_eq!(sources[0].state, "TX");
        assert_eq!(sources[0].source_type, SourceType::HtmlHub);
        assert!(sources[0].allow_pattern.is_some());

        assert_eq!(sources[1].source_type, SourceType::Feed);
        assert_eq!(
            sources[1].feed_url.as_deref(),
            Some("https://www.tax.ny.gov/rss/bulletins.xml")
        );

        assert_eq!(sources[2].source_type, SourceType::Sitemap);
        assert!(!sources[2].active);
    }

    #[test]
    fn test_catalogue_errors() {
        let bad_type = "states:\n  - code: CA\n    hubs:\n      - {name: x, url: 'https://a.gov/', type: podcast}\n";
        assert!(matches!(
            parse_catalogue(bad_type),
            Err(DiscoveryError::Catalogue(_))
        ));

        let bad_re = "states:\n  - code: CA\n    hubs:\n      - {name: x, url: 'https://a.gov/', allow_re: '(['}\n";
        assert!(matches!(
            parse_catalogue(bad_re),
            Err(DiscoveryError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_parse_seeds() {
        let content = "\u{feff}# seeds\nhttps://a.gov/one\n\nhttps://a.gov/one#dup\nhttps://a.gov/two  # note\nnot a url\nftp://a.gov/x\n";
        assert_eq!(
            parse_seeds(content),
            vec!["https://a.gov/one", "https://a.gov/two"]
        );
    }

    #[test]
    fn test_load_seeds_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "https://a.gov/x\n").unwrap();
        assert_eq!(load_seeds(&path).unwrap(), vec!["https://a.gov/x"]);
        assert!(load_seeds(&dir.path().join("missing.txt")).is_err());
    }
}

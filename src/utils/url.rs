//! URL hygiene helpers.

use url::Url;

/// Trim a raw URL taken from a seed list or catalogue.
///
/// Strips a leading BOM, surrounding whitespace, trailing inline comments
/// (`  # note`, `← note`) and the fragment.
pub fn clean_url(raw: &str) -> String {
    let mut u = raw.trim().trim_start_matches('\u{feff}').trim();

    for sep in ["\t", "  ", " #", "←"] {
        if let Some((head, _)) = u.split_once(sep) {
            u = head.trim();
        }
    }

    u.split('#').next().unwrap_or_default().trim().to_string()
}

/// Canonical form of a URL used as the dedup key.
///
/// Scheme and host are lowercased by the parser, default ports dropped and
/// the fragment removed. Path and query are kept as served.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.set_fragment(None);
    if parsed.path().is_empty() {
        parsed.set_path("/");
    }
    Some(parsed.to_string())
}

/// Lowercased host of a URL.
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_url_strips_noise() {
        assert_eq!(
            clean_url("\u{feff}  https://tax.example.gov/news#top  "),
            "https://tax.example.gov/news"
        );
        assert_eq!(
            clean_url("https://tax.example.gov/a  # sales tax page"),
            "https://tax.example.gov/a"
        );
        assert_eq!(clean_url("https://x.gov/b ← old"), "https://x.gov/b");
        assert_eq!(clean_url("# just a comment"), "");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://Tax.Example.GOV:443/News?id=3#frag").as_deref(),
            Some("https://tax.example.gov/News?id=3")
        );
        assert_eq!(
            normalize_url("http://example.gov").as_deref(),
            Some("http://example.gov/")
        );
        assert!(normalize_url("mailto:someone@example.gov").is_none());
        assert!(normalize_url("not a url").is_none());
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://Comptroller.Texas.gov/taxes/"),
            Some("comptroller.texas.gov".to_string())
        );
        assert_eq!(extract_domain("nope"), None);
    }
}

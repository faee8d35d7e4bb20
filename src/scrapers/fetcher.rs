//! Layered fetching: a plain GET first, a rendered browser fetch only when the
//! static HTML looks empty or script-built.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::browser::BrowserFetcher;
use super::http_client::{page_from_parts, HttpClient};
use super::rate_limiter::PolitenessGate;
use super::{FetchError, FetchedPage, PageFetcher};
use crate::discovery::RobotsCache;

/// Default minimum visible text for a static HTML page to count as complete.
pub const DEFAULT_MIN_HTML_CHARS: usize = 200;

/// When to use the rendered-browser strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    /// Only when the static page fails the content heuristic.
    #[default]
    Auto,
    /// For every HTML page.
    Always,
    Off,
}

impl FromStr for BrowserMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" | "on" => Ok(Self::Always),
            "off" | "never" | "0" | "false" => Ok(Self::Off),
            other => Err(format!("unknown browser mode: {}", other)),
        }
    }
}

/// An empty client-side mount point: the page body is built by scripts.
static SPA_SHELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<div[^>]*\bid\s*=\s*["'](?:root|app|__next|___gatsby|__nuxt)["'][^>]*>\s*</div>"#,
    )
    .unwrap()
});

/// Count non-whitespace characters of visible body text.
pub fn visible_text_chars(html: &str) -> usize {
    let document = Html::parse_document(html);
    let Ok(body) = Selector::parse("body") else {
        return 0;
    };
    let Some(body) = document.select(&body).next() else {
        return 0;
    };

    let skip = ["script", "style", "noscript", "template"];
    body.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| skip.contains(&e.name()))
            });
            (!hidden).then_some(text)
        })
        .map(|t| t.chars().filter(|c| !c.is_whitespace()).count())
        .sum()
}

/// Whether a static HTML page should be re-fetched with a browser.
pub fn needs_rendering(page: &FetchedPage, min_html_chars: usize) -> bool {
    if !page.is_html() {
        return false;
    }
    let html = page.text();
    visible_text_chars(&html) < min_html_chars || SPA_SHELL.is_match(&html)
}

/// One way of fetching a URL, tried in order by [`LayeredFetcher`].
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap check against the best result so far (`None` if nothing yet).
    fn applies(&self, previous: Option<&FetchedPage>) -> bool;

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// Whether `candidate` should replace the previous result.
    fn accept(&self, _candidate: &FetchedPage, _previous: Option<&FetchedPage>) -> bool {
        true
    }
}

/// Plain GET with retries.
pub struct StaticStrategy {
    client: HttpClient,
}

impl StaticStrategy {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FetchStrategy for StaticStrategy {
    fn name(&self) -> &'static str {
        "static"
    }

    fn applies(&self, previous: Option<&FetchedPage>) -> bool {
        previous.is_none()
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.client.get_with_retry(url).await
    }
}

/// Browser render of an HTML page the static fetch could not see.
pub struct RenderedStrategy {
    browser: Mutex<BrowserFetcher>,
    gate: PolitenessGate,
    mode: BrowserMode,
    min_html_chars: usize,
}

impl RenderedStrategy {
    pub fn new(browser: BrowserFetcher, gate: PolitenessGate, mode: BrowserMode) -> Self {
        Self {
            browser: Mutex::new(browser),
            gate,
            mode,
            min_html_chars: DEFAULT_MIN_HTML_CHARS,
        }
    }

    pub fn with_min_html_chars(mut self, min: usize) -> Self {
        self.min_html_chars = min;
        self
    }

    pub async fn close(&self) {
        self.browser.lock().await.close().await;
    }
}

#[async_trait]
impl FetchStrategy for RenderedStrategy {
    fn name(&self) -> &'static str {
        "rendered"
    }

    fn applies(&self, previous: Option<&FetchedPage>) -> bool {
        let Some(previous) = previous else {
            return false;
        };
        match self.mode {
            BrowserMode::Off => false,
            BrowserMode::Always => previous.is_html(),
            BrowserMode::Auto => needs_rendering(previous, self.min_html_chars),
        }
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let admission = self
            .gate
            .acquire(url)
            .await
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
        self.gate.verify(&admission, url)?;

        let rendered = self
            .browser
            .lock()
            .await
            .fetch(url)
            .await
            .map_err(|e| FetchError::Browser {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(page_from_parts(
            url,
            &rendered.final_url,
            200,
            Some("text/html".to_string()),
            rendered.html.into_bytes(),
            true,
        ))
    }

    fn accept(&self, candidate: &FetchedPage, _previous: Option<&FetchedPage>) -> bool {
        visible_text_chars(&candidate.text()) >= self.min_html_chars
    }
}

/// Tries strategies in order, keeping the best accepted result.
pub struct LayeredFetcher {
    strategies: Vec<Box<dyn FetchStrategy>>,
    robots: Option<Arc<RobotsCache>>,
}

impl LayeredFetcher {
    pub fn new(strategies: Vec<Box<dyn FetchStrategy>>) -> Self {
        Self {
            strategies,
            robots: None,
        }
    }

    /// Refuse URLs the domain's robots rules disallow.
    pub fn with_robots(mut self, robots: Arc<RobotsCache>) -> Self {
        self.robots = Some(robots);
        self
    }
}

#[async_trait]
impl PageFetcher for LayeredFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if let Some(ref robots) = self.robots {
            if !robots.is_allowed(url).await {
                return Err(FetchError::Disallowed {
                    url: url.to_string(),
                });
            }
        }

        let mut best: Option<FetchedPage> = None;
        for strategy in &self.strategies {
            if !strategy.applies(best.as_ref()) {
                continue;
            }
            debug!("Fetching {} via {} strategy", url, strategy.name());

            match strategy.fetch(url).await {
                Ok(page) => {
                    if best.is_none() || strategy.accept(&page, best.as_ref()) {
                        best = Some(page);
                    } else {
                        debug!("Discarding {} result for {}", strategy.name(), url);
                    }
                }
                Err(e) if best.is_none() => return Err(e),
                Err(e) => debug!("{} strategy failed for {}: {}", strategy.name(), url, e),
            }
        }

        best.ok_or_else(|| FetchError::InvalidUrl(url.to_string()))
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.get_with_retry(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn html_page(body: &str) -> FetchedPage {
        page_from_parts(
            "https://a.gov/",
            "https://a.gov/",
            200,
            Some("text/html".to_string()),
            format!("<html><body>{}</body></html>", body).into_bytes(),
            false,
        )
    }

    struct Canned {
        name: &'static str,
        first: bool,
        page: Option<FetchedPage>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FetchStrategy for Canned {
        fn name(&self) -> &'static str {
            self.name
        }

        fn applies(&self, previous: Option<&FetchedPage>) -> bool {
            if self.first {
                previous.is_none()
            } else {
                previous.is_some_and(|p| needs_rendering(p, DEFAULT_MIN_HTML_CHARS))
            }
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.page.clone().ok_or_else(|| FetchError::Browser {
                url: url.to_string(),
                reason: "no chrome".to_string(),
            })
        }

        fn accept(&self, candidate: &FetchedPage, _previous: Option<&FetchedPage>) -> bool {
            visible_text_chars(&candidate.text()) >= DEFAULT_MIN_HTML_CHARS
        }
    }

    fn layered(
        static_page: FetchedPage,
        rendered: Option<FetchedPage>,
    ) -> (LayeredFetcher, Arc<AtomicUsize>) {
        let rendered_calls = Arc::new(AtomicUsize::new(0));
        let fetcher = LayeredFetcher::new(vec![
            Box::new(Canned {
                name: "static",
                first: true,
                page: Some(static_page),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(Canned {
                name: "rendered",
                first: false,
                page: rendered,
                calls: rendered_calls.clone(),
            }),
        ]);
        (fetcher, rendered_calls)
    }

    #[test]
    fn test_visible_text_ignores_scripts() {
        let html = "<html><head><title>x</title></head><body><script>var a = 1;</script><p>ab c</p></body></html>";
        assert_eq!(visible_text_chars(html), 3);
    }

    #[test]
    fn test_needs_rendering() {
        assert!(needs_rendering(&html_page("<p>short</p>"), 200));
        assert!(!needs_rendering(&html_page(&"word ".repeat(100)), 200));

        let shell = format!("<div id=\"root\"></div><p>{}</p>", "x".repeat(300));
        assert!(needs_rendering(&html_page(&shell), 200));

        let pdf = page_from_parts("u", "u", 200, None, b"%PDF-1.5".to_vec(), false);
        assert!(!needs_rendering(&pdf, 200));
    }

    #[test]
    fn test_browser_mode_parse() {
        assert_eq!("AUTO".parse::<BrowserMode>().unwrap(), BrowserMode::Auto);
        assert_eq!("always".parse::<BrowserMode>().unwrap(), BrowserMode::Always);
        assert_eq!("off".parse::<BrowserMode>().unwrap(), BrowserMode::Off);
        assert!("sometimes".parse::<BrowserMode>().is_err());
    }

    #[tokio::test]
    async fn test_full_static_page_skips_browser() {
        let (fetcher, rendered_calls) = layered(html_page(&"text ".repeat(100)), None);
        let page = fetcher.fetch("https://a.gov/").await.unwrap();
        assert!(!page.rendered);
        assert_eq!(rendered_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_thin_page_escalates() {
        let mut rendered = html_page(&"rendered ".repeat(60));
        rendered.rendered = true;
        let (fetcher, rendered_calls) = layered(html_page("<div id=\"app\"></div>"), Some(rendered));

        let page = fetcher.fetch("https://a.gov/").await.unwrap();
        assert!(page.rendered);
        assert_eq!(rendered_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_thin_render_keeps_static() {
        let mut rendered = html_page("<p>still thin</p>");
        rendered.rendered = true;
        let (fetcher, _) = layered(html_page("<p>thin</p>"), Some(rendered));

        let page = fetcher.fetch("https://a.gov/").await.unwrap();
        assert!(!page.rendered);
    }

    #[tokio::test]
    async fn test_browser_failure_keeps_static() {
        let (fetcher, rendered_calls) = layered(html_page("<p>thin</p>"), None);
        let page = fetcher.fetch("https://a.gov/").await.unwrap();
        assert!(!page.rendered);
        assert_eq!(rendered_calls.load(Ordering::SeqCst), 1);
    }
}

//! Main-content extraction from HTML.
//!
//! Readability-style: paragraphs vote for their parent (full score) and
//! grandparent (half score), candidates are penalized by link density and
//! the winner's headings, paragraphs and list items become the text. When
//! that yields little, a chrome-stripped walk of the whole body competes
//! and the longer text wins.

use std::collections::HashMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

use super::{ExtractionError, ExtractionStrategy, RawExtraction};
use crate::utils::{mime_type_category, MimeCategory};

/// Never contribute text.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg", "iframe"];
/// Page chrome dropped by the fallback walk.
const CHROME_TAGS: &[&str] = &["nav", "header", "footer", "aside", "form"];
const BLOCK_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6", "p", "li"];
/// Elements that separate words when their text is flattened.
const BREAK_TAGS: &[&str] = &[
    "br", "div", "p", "li", "td", "th", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section",
];

static PARAGRAPHS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p, pre, td").unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

/// Paragraphs shorter than this do not vote.
const MIN_PARAGRAPH_CHARS: usize = 25;

#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    /// Below this, the fallback walk also runs and the longer text wins.
    pub min_text_chars: usize,
    /// Longer blocks are truncated with an ellipsis.
    pub max_block_chars: usize,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self {
            min_text_chars: 400,
            max_block_chars: 4000,
        }
    }
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract main text and a title hint from an HTML string.
    pub fn extract_html(&self, html: &str) -> (String, Option<String>) {
        let doc = Html::parse_document(html);
        let title = page_title(&doc);

        let main = best_candidate(&doc)
            .map(|el| self.join_blocks(collect_blocks(el, &[])))
            .unwrap_or_default();
        if main.chars().count() >= self.min_text_chars {
            return (main, title);
        }

        let fallback = self.fallback_text(&doc);
        let text = if fallback.chars().count() > main.chars().count() {
            fallback
        } else {
            main
        };
        (text, title)
    }

    fn fallback_text(&self, doc: &Html) -> String {
        let root = doc
            .select(&BODY)
            .next()
            .unwrap_or_else(|| doc.root_element());
        let blocks = collect_blocks(root, CHROME_TAGS);
        if !blocks.is_empty() {
            return self.join_blocks(blocks);
        }
        let mut text = String::new();
        flatten_text(root, CHROME_TAGS, &mut text);
        collapse_ws(&text)
    }

    fn join_blocks(&self, blocks: Vec<String>) -> String {
        blocks
            .into_iter()
            .map(|b| cap_block(&b, self.max_block_chars))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl ExtractionStrategy for HtmlExtractor {
    fn name(&self) -> &'static str {
        "html"
    }

    fn applies(&self, mime: &str, _bytes: &[u8]) -> bool {
        mime_type_category(mime) == MimeCategory::Html
    }

    fn extract_raw(&self, bytes: &[u8]) -> Result<RawExtraction, ExtractionError> {
        let html = String::from_utf8_lossy(bytes);
        let (text, title) = self.extract_html(&html);
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty("html has no visible text".to_string()));
        }
        Ok(RawExtraction {
            text,
            title,
            ..RawExtraction::default()
        })
    }
}

fn page_title(doc: &Html) -> Option<String> {
    let og = doc
        .select(&OG_TITLE)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(collapse_ws);
    let title = || {
        doc.select(&TITLE)
            .next()
            .map(|t| collapse_ws(&t.text().collect::<String>()))
    };
    let h1 = || doc.select(&H1).next().map(element_text);

    og.filter(|t| !t.is_empty())
        .or_else(|| title().filter(|t| !t.is_empty()))
        .or_else(|| h1().filter(|t| !t.is_empty()))
}

/// Highest-scoring content container, if any paragraph voted.
fn best_candidate(doc: &Html) -> Option<ElementRef<'_>> {
    let mut order = Vec::new();
    let mut scores = HashMap::new();

    for p in doc.select(&PARAGRAPHS) {
        if has_ancestor(p, SKIP_TAGS) {
            continue;
        }
        let text = element_text(p);
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let score = 1.0 + text.matches(',').count() as f64 + (len / 100).min(3) as f64;

        let mut votes = Vec::new();
        if let Some(parent) = p.parent().and_then(ElementRef::wrap) {
            votes.push((parent.id(), score));
            if let Some(grand) = parent.parent().and_then(ElementRef::wrap) {
                votes.push((grand.id(), score / 2.0));
            }
        }
        for (id, vote) in votes {
            if !scores.contains_key(&id) {
                order.push(id);
            }
            *scores.entry(id).or_insert(0.0) += vote;
        }
    }

    let mut best: Option<(ElementRef<'_>, f64)> = None;
    for id in order {
        let Some(el) = doc.tree.get(id).and_then(ElementRef::wrap) else {
            continue;
        };
        let score = scores.get(&id).copied().unwrap_or(0.0) * (1.0 - link_density(el));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((el, score));
        }
    }
    best.map(|(el, _)| el)
}

fn link_density(el: ElementRef<'_>) -> f64 {
    let total = element_text(el).chars().count();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = el
        .select(&LINKS)
        .map(|a| element_text(a).chars().count())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

fn has_ancestor(el: ElementRef<'_>, tags: &[&str]) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| tags.contains(&a.value().name()))
}

/// Top-level heading, paragraph and list-item blocks under `root`, in
/// document order. Blocks nested in other blocks are folded into their
/// outermost block.
fn collect_blocks(root: ElementRef<'_>, excluded: &[&str]) -> Vec<String> {
    let mut blocks = Vec::new();
    walk_blocks(root, excluded, &mut blocks);
    blocks
}

fn walk_blocks(el: ElementRef<'_>, excluded: &[&str], blocks: &mut Vec<String>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        let name = child.value().name();
        if SKIP_TAGS.contains(&name) || excluded.contains(&name) {
            continue;
        }
        if BLOCK_TAGS.contains(&name) {
            let text = element_text(child);
            if !text.is_empty() {
                blocks.push(text);
            }
        } else {
            walk_blocks(child, excluded, blocks);
        }
    }
}

/// Visible text of an element with whitespace collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    flatten_text(el, &[], &mut out);
    collapse_ws(&out)
}

fn flatten_text(el: ElementRef<'_>, excluded: &[&str], out: &mut String) {
    for child in el.children() {
        if let Node::Text(text) = child.value() {
            out.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        if SKIP_TAGS.contains(&name) || excluded.contains(&name) {
            continue;
        }
        let breaks = BREAK_TAGS.contains(&name);
        if breaks {
            out.push(' ');
        }
        flatten_text(child, excluded, out);
        if breaks {
            out.push(' ');
        }
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap_block(block: &str, max: usize) -> String {
    if block.chars().count() <= max {
        return block.to_string();
    }
    let cut: String = block.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<!doctype html><html><head>
        <title>Agency | Home</title>
        <meta property="og:title" content="Tax Bulletin 24-07">
        <script>var tracking = "ignore me";</script>
      </head><body>
        <nav><ul><li><a href="/">Home</a></li><li><a href="/forms">Forms</a></li></ul></nav>
        <div id="content">
          <h1>Local Rate Changes</h1>
          <p>Beginning July 1, 2024, several local jurisdictions will change their sales and use tax rates, as listed below.</p>
          <p>Sellers must begin collecting the new rates on that date, and returns for the period must reflect them.</p>
          <ul><li>City of Alpha: 8.25%</li><li>City of Beta: 7.75% <ul><li>nested note</li></ul></li></ul>
        </div>
        <footer><p>Copyright, all rights reserved, State Department of Revenue, 2024.</p></footer>
      </body></html>"#;

    #[test]
    fn test_main_content_and_title() {
        let (text, title) = HtmlExtractor::new().extract_html(ARTICLE);
        assert_eq!(title.as_deref(), Some("Tax Bulletin 24-07"));
        assert!(text.starts_with("Local Rate Changes\n\nBeginning July 1, 2024"));
        assert!(text.contains("City of Beta: 7.75% nested note"));
        assert!(!text.contains("ignore me"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("\n\nHome"));
    }

    #[test]
    fn test_title_falls_back_to_title_tag() {
        let html = "<html><head><title> Notice  42 </title></head><body><p>x</p></body></html>";
        let (_, title) = HtmlExtractor::new().extract_html(html);
        assert_eq!(title.as_deref(), Some("Notice 42"));
    }

    #[test]
    fn test_fallback_for_div_soup() {
        let html = "<html><body><header>Site header</header><div>Short announcement text only in a div.</div></body></html>";
        let (text, _) = HtmlExtractor::new().extract_html(html);
        assert_eq!(text, "Short announcement text only in a div.");
    }

    #[test]
    fn test_block_cap() {
        let long = "a".repeat(5000);
        let html = format!("<html><body><article><p>{}</p></article></body></html>", long);
        let extractor = HtmlExtractor {
            min_text_chars: 400,
            max_block_chars: 100,
        };
        let (text, _) = extractor.extract_html(&html);
        assert_eq!(text.chars().count(), 101);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn test_empty_page_is_an_error() {
        let result = HtmlExtractor::new().extract_raw(b"<html><body><script>x()</script></body></html>");
        assert!(matches!(result, Err(ExtractionError::Empty(_))));
    }

    #[test]
    fn test_deterministic() {
        let a = HtmlExtractor::new().extract_html(ARTICLE);
        let b = HtmlExtractor::new().extract_html(ARTICLE);
        assert_eq!(a, b);
    }
}

//! Content extraction: raw payload bytes to normalized text plus fields.
//!
//! Format handling is an ordered list of [`ExtractionStrategy`]s; the first
//! one that applies to the payload wins. Everything after that (normalizing,
//! hashing, titling, classification and field extraction) is shared, so the
//! same bytes always produce the same [`Extracted`].

pub mod classify;
pub mod fields;
pub mod html;
pub mod normalize;
pub mod pdf;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

pub use classify::{Classifier, GENERAL_TOPIC};
pub use fields::{
    cap_title, derive_title, DocumentFields, EffectiveDateExtractor, FieldExtractor,
    FieldRegistry, FormIdExtractor,
};
pub use html::HtmlExtractor;
pub use normalize::{content_chars, normalize_text, strip_boilerplate};
pub use pdf::{OcrStrategy, PageTextStrategy, PdfExtractor, TextLayerStrategy, DEFAULT_MIN_PAGE_CHARS};

use crate::models::compute_content_hash;
use crate::ocr::{OcrBackend, PdfTextLayer};
use crate::utils::{mime_type_category, MimeCategory};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported content type: {0}")]
    Unsupported(String),

    #[error("No extractable text: {0}")]
    Empty(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Format-specific output before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraction {
    pub text: String,
    /// Title from document metadata (`og:title`, `<title>`, PDF Title).
    pub title: Option<String>,
    /// Revision stamp from document metadata.
    pub revision: Option<String>,
    /// Non-fatal problems, e.g. pages that failed.
    pub notes: Vec<String>,
}

/// One payload format.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap check on the declared MIME type and leading bytes.
    fn applies(&self, mime: &str, bytes: &[u8]) -> bool;

    fn extract_raw(&self, bytes: &[u8]) -> Result<RawExtraction, ExtractionError>;
}

/// `text/*` that is not HTML, decoded as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl ExtractionStrategy for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn applies(&self, mime: &str, _bytes: &[u8]) -> bool {
        mime_type_category(mime) == MimeCategory::Text
    }

    fn extract_raw(&self, bytes: &[u8]) -> Result<RawExtraction, ExtractionError> {
        Ok(RawExtraction {
            text: String::from_utf8_lossy(bytes).into_owned(),
            ..RawExtraction::default()
        })
    }
}

/// Result of extracting one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extracted {
    pub normalized_text: String,
    pub content_hash: String,
    pub title: String,
    pub fields: DocumentFields,
    pub pdf_revision: Option<String>,
    /// Name of the strategy that handled the payload.
    pub method: &'static str,
    pub notes: Vec<String>,
}

pub struct ContentExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    fields: FieldRegistry,
    classifier: Classifier,
}

impl ContentExtractor {
    /// An extractor with no formats registered.
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            fields: FieldRegistry::default(),
            classifier: Classifier::new(),
        }
    }

    /// PDF (text layer, then OCR when a backend is given), HTML, plain text.
    pub fn standard(
        layer: Arc<dyn PdfTextLayer>,
        ocr: Option<Arc<dyn OcrBackend>>,
        min_page_chars: usize,
    ) -> Self {
        let mut pdf = PdfExtractor::new(layer);
        if let Some(backend) = ocr {
            pdf = pdf.with_ocr(backend, min_page_chars);
        }
        Self::new()
            .with_strategy(pdf)
            .with_strategy(HtmlExtractor::new())
            .with_strategy(PlainTextExtractor)
    }

    pub fn with_strategy(mut self, strategy: impl ExtractionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn with_fields(mut self, fields: FieldRegistry) -> Self {
        self.fields = fields;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extract normalized text and fields from a payload.
    pub fn extract(&self, bytes: &[u8], mime: &str) -> Result<Extracted, ExtractionError> {
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.applies(mime, bytes))
            .ok_or_else(|| ExtractionError::Unsupported(mime.to_string()))?;

        let raw = strategy.extract_raw(bytes)?;
        let normalized_text = normalize_text(&raw.text);
        if normalized_text.is_empty() {
            return Err(ExtractionError::Empty(format!(
                "{} output normalized to nothing",
                strategy.name()
            )));
        }

        let title = raw
            .title
            .as_deref()
            .map(cap_title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| derive_title(&normalized_text));

        let (topic, score) = self.classifier.classify(&normalized_text);
        let mut fields = DocumentFields {
            topic,
            score,
            ..DocumentFields::default()
        };
        self.fields.apply(&normalized_text, &mut fields);

        Ok(Extracted {
            content_hash: compute_content_hash(&normalized_text),
            normalized_text,
            title,
            fields,
            pdf_revision: raw.revision,
            method: strategy.name(),
            notes: raw.notes,
        })
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new()
            .with_strategy(HtmlExtractor::new())
            .with_strategy(PlainTextExtractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const NOTICE: &str = r#"<html><head><title>Notice 2024-11</title></head><body>
        <main>
          <h2>Sales Tax Rate Increase</h2>
          <p>The combined sales tax rate will increase by 0.5 percent, effective 10/1/2024, for all sellers.</p>
          <p>Report the new rate on Form DR-15 beginning with the October return, as described below.</p>
        </main></body></html>"#;

    #[test]
    fn test_html_pipeline() {
        let out = ContentExtractor::default()
            .extract(NOTICE.as_bytes(), "text/html")
            .unwrap();
        assert_eq!(out.title, "Notice 2024-11");
        assert_eq!(out.method, "html");
        assert!(out.normalized_text.starts_with("sales tax rate increase\n\n"));
        assert_eq!(out.fields.topic, "Rates");
        assert_eq!(out.fields.effective_date, NaiveDate::from_ymd_opt(2024, 10, 1));
        assert_eq!(out.fields.form_id.as_deref(), Some("DR-15"));
        assert_eq!(out.content_hash, compute_content_hash(&out.normalized_text));
    }

    #[test]
    fn test_stable_across_runs() {
        let extractor = ContentExtractor::default();
        let a = extractor.extract(NOTICE.as_bytes(), "text/html").unwrap();
        let b = extractor.extract(NOTICE.as_bytes(), "text/html").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_plain_text_title_derived() {
        let out = ContentExtractor::default()
            .extract(b"Bulletin: Marketplace facilitator collection rules\n\nDetails follow.", "text/plain")
            .unwrap();
        assert_eq!(out.title, "marketplace facilitator collection rules");
        assert_eq!(out.fields.topic, "Marketplace");
    }

    #[test]
    fn test_unsupported() {
        let result = ContentExtractor::default().extract(&[0x89, b'P', b'N', b'G'], "image/png");
        assert!(matches!(result, Err(ExtractionError::Unsupported(_))));
    }

    #[test]
    fn test_strategy_order() {
        assert_eq!(ContentExtractor::default().strategy_names(), vec!["html", "text"]);
    }
}
